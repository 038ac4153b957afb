use crate::model::CollectionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Collection kind as typed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KindArg {
    Photostream,
    #[value(alias = "albums", alias = "sets")]
    Album,
    #[value(alias = "galleries")]
    Gallery,
    #[value(alias = "faves")]
    Favorites,
    #[value(alias = "group")]
    Pool,
}

impl From<KindArg> for CollectionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Photostream => CollectionKind::Photostream,
            KindArg::Album => CollectionKind::Album,
            KindArg::Gallery => CollectionKind::Gallery,
            KindArg::Favorites => CollectionKind::Favorites,
            KindArg::Pool => CollectionKind::Pool,
        }
    }
}
