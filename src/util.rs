pub mod object;
pub mod poll;
pub mod reader;
