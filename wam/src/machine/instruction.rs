use core::fmt;

use arcstr::ArcStr;

use super::basic_types::{Ai, Label, Signature};

/// One instruction of a code image, addressed by its position in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    PutConstant { ai: Ai, name: ArcStr },
    PutVariable { ai: Ai },
    PutValue { ai: Ai, source: Ai },
    PutStructure { ai: Ai, signature: Signature },
    GetConstant { ai: Ai, name: ArcStr },
    GetVariable { ai: Ai },
    GetValue { ai: Ai, source: Ai },
    GetStructure { ai: Ai, signature: Signature },
    Call { label: Label },
    Proceed,
    Allocate,
    Deallocate,
    Halt,
    TryMeElse { label: Label },
    RetryMeElse { label: Label },
    TrustMe,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PutConstant { ai, name } => write!(f, "put_constant({name},{ai})"),
            Instruction::PutVariable { ai } => write!(f, "put_variable({ai})"),
            Instruction::PutValue { ai, source } => write!(f, "put_value({source},{ai})"),
            Instruction::PutStructure { ai, signature } => {
                write!(f, "put_structure({signature},{ai})")
            }
            Instruction::GetConstant { ai, name } => write!(f, "get_constant({name},{ai})"),
            Instruction::GetVariable { ai } => write!(f, "get_variable({ai})"),
            Instruction::GetValue { ai, source } => write!(f, "get_value({source},{ai})"),
            Instruction::GetStructure { ai, signature } => {
                write!(f, "get_structure({signature},{ai})")
            }
            Instruction::Call { label } => write!(f, "call({label})"),
            Instruction::Proceed => write!(f, "proceed"),
            Instruction::Allocate => write!(f, "allocate"),
            Instruction::Deallocate => write!(f, "deallocate"),
            Instruction::Halt => write!(f, "halt"),
            Instruction::TryMeElse { label } => write!(f, "try_me_else({label})"),
            Instruction::RetryMeElse { label } => write!(f, "retry_me_else({label})"),
            Instruction::TrustMe => write!(f, "trust_me"),
        }
    }
}
