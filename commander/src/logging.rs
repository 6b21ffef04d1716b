use slog::{Drain, Level, Logger, o};

/// Terminal logger behind an async drain, filtered at `level`.
pub fn create_logger(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .build()
        .fuse()
        .filter_level(level)
        .fuse();

    Logger::root(drain, o!())
}
