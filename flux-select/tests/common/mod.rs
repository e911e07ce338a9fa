#![allow(dead_code)]

use flux_select::engine::lab::LabReactor;
use flux_select::{FluxSelector, SelectorBuilder};

use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A selector on a fresh lab engine with the default configuration.
pub fn lab_selector<T: Clone>() -> FluxSelector<LabReactor, T> {
    init_tracing();
    FluxSelector::new(LabReactor::new())
}

/// A selector on a fresh lab engine built from `builder`.
pub fn lab_selector_with<T: Clone>(builder: SelectorBuilder) -> FluxSelector<LabReactor, T> {
    init_tracing();
    builder.build(LabReactor::new())
}
