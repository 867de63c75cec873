//! Data types shared by every merge stage.

mod batch;
mod cell;
mod key;
mod schema;
mod table_row;
mod target_row;

pub use batch::*;
pub use cell::*;
pub use key::*;
pub use schema::*;
pub use table_row::*;
pub use target_row::*;
