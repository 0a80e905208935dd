use anyhow::Result;

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::ConfigArgs) -> Result<()> {
    let params = geoclimate::config::load(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}
