//! Integration tests for the Threatlens relay
//!
//! These tests verify the complete request/response flow: the relay endpoint
//! against a mocked provider, and the stream consumer against a live relay.

mod consumer;
mod health;
