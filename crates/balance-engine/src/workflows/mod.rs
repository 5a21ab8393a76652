pub mod balancing;
