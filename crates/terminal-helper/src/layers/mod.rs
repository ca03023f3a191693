pub(crate) mod analysis;
pub(crate) mod execution;
pub(crate) mod extract;
pub(crate) mod service;
pub(crate) mod ui;
