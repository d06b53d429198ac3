use core::fmt;
use std::collections::HashMap;

use arcstr::ArcStr;

pub trait NoneRepresents: fmt::Display {
    const NONE_REPRESENTS: &'static str;
}

pub struct OptionDisplay<T: NoneRepresents>(pub Option<T>);

impl<T: NoneRepresents> fmt::Display for OptionDisplay<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            Some(t) => fmt::Display::fmt(t, f),
            None => f.write_str(T::NONE_REPRESENTS),
        }
    }
}

/// An Argument Register Index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ai(pub u8);

impl Ai {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Ai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a({})", self.0)
    }
}

/// The address of a heap cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u16);

impl Address {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An instruction's position in the code image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeAddress(pub u16);

impl CodeAddress {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NoneRepresents for CodeAddress {
    const NONE_REPRESENTS: &'static str = "end of program";
}

/// A predicate signature, e.g. `parent/2`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: ArcStr,
    pub arity: u8,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// A code label: a predicate's entry point, or a synthetic link between
/// consecutive clauses of a choice chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Predicate(Signature),
    Retry { predicate: Signature, clause: u8 },
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Predicate(signature) => write!(f, "{signature}"),
            Label::Retry { predicate, clause } => write!(f, "{predicate}#{clause}"),
        }
    }
}

pub type LabelTable = HashMap<Label, CodeAddress>;
