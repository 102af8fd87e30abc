//! Target instruction-set support. The only target is x86-64.

pub mod x64;
