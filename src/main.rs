fn main() -> anyhow::Result<()> {
    ancestry_pipeline::cli::run()
}
