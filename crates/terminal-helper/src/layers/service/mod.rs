pub(crate) mod events;
pub(crate) mod flush;
pub(crate) mod logging;
pub(crate) mod orchestrator;
pub(crate) mod sink;
mod headless;

pub(crate) use headless::run_once;
