use clap::Parser;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use cadence::calendar::CalendarDay;
use cadence::cli::{self, Cli, Context};
use cadence::{Config, Database, Profile, init_logging, utils};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev {
        Profile::Dev
    } else {
        Profile::Prod
    };

    let config = match cli.config.as_deref() {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("Failed to read config file {}", path))?;
            Config::from_toml(&contents)?
        }
        None => Config::load_with_profile(profile)?,
    };

    init_logging(&config.log_level);

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path.to_str()
            .ok_or_else(|| eyre!("Database path contains invalid UTF-8"))?
    )?;

    // The only place the wall clock is read; everything below gets `today` explicitly
    let today = match cli.today.as_deref() {
        Some(text) => CalendarDay::parse(text)?,
        None => utils::today(),
    };

    let ctx = Context {
        user: cli.user.unwrap_or_else(|| config.user.clone()),
        today,
        json: cli.json,
        default_view: config.chart_view()?,
        default_color: config.default_habit_color.clone(),
    };

    cli::run(cli.command, &db, &ctx)?;

    Ok(())
}
