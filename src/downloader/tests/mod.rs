//! Unit tests for the parallel download engine.
