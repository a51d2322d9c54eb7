use clap::Parser;
use color_eyre::Result;
use tasklog::cli::{self, Cli};
use tasklog::{Config, Database, PreferenceStore, Profile, TaskRepository, logging};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    let cli = Cli::parse();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev { Profile::Dev } else { Profile::Prod };

    let config = match &cli.config {
        Some(path) => Config::load_from(&tasklog::utils::expand_path(path), profile)?,
        None => Config::load_with_profile(profile)?,
    };
    logging::init(&config.log_level);

    // A store that cannot be opened is fatal
    let db = Database::new(&config.get_database_path())?;
    let repo = TaskRepository::new(db);
    let prefs = PreferenceStore::open(&config.get_preferences_dir(), &config.preferences_namespace)?;

    cli::run(cli.command, &repo, &prefs)?;
    Ok(())
}
