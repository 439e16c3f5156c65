pub mod browser;
pub mod classifier;
pub mod consolidate;
pub mod extractor;
pub mod flow;
pub mod normalize;
pub mod orchestrator;
pub mod session;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
