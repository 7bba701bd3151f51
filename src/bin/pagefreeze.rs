use anyhow::Result;

fn main() -> Result<()> {
    pagefreeze::cli::run()
}
