//! The three-address-code intermediate representation.

pub mod builder;
pub mod entities;
pub mod instructions;

pub use self::builder::TacBuilder;
pub use self::entities::{Block, InstId, Scope};
pub use self::instructions::{
    extract_label, is_label_name, is_temporary, is_user_defined_var, Opcode, TacInst,
};
