use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Build the target filter: the configured level as the default plus one
/// directive per override.
pub fn filter(config: &LoggingConfig) -> Targets {
    config
        .overrides
        .iter()
        .fold(
            Targets::new().with_default(LevelFilter::from(config.level)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        )
}

/// Install the global subscriber. Logs go to stderr so stdout stays free for
/// the presenter and `--list-areas` output.
pub fn init(config: &LoggingConfig) {
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if let Err(e) = tracing_subscriber::registry()
        .with(fmt)
        .with(filter(config))
        .try_init()
    {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}
