//! Cross-module tests for the cached environmental service.

mod service_tests;
