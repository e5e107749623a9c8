use anyhow::Result;

fn main() -> Result<()> {
    pybox::cli::run()
}
