//! Screen state without the screens: each model owns its query, results and
//! load state, and is driven by the CLI or the HTTP API.

pub mod browse;
pub mod debounce;
pub mod detail;
pub mod search;

pub use browse::BrowseModel;
pub use debounce::{debounce, DEFAULT_DEBOUNCE};
pub use detail::DetailModel;
pub use search::SearchModel;

/// Load state shared by the list models.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    /// The query succeeded but matched nothing.
    NoResults,
    Error(String),
}
