// Test Helpers Module
//
// In-memory doubles for the remote analytics instances and the external
// store, shared by unit tests and the integration suites under tests/.

pub mod fake_remote;

pub use fake_remote::{FakeClientFactory, FakeRemoteApi, Method, RecordedCall};
