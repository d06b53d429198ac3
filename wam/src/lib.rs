pub mod machine;

pub use machine::{
    Address, Ai, Cell, CodeAddress, ExecutionError, Instruction, Label, LabelTable, Limits,
    Machine, RunOutcome, Signature,
};
