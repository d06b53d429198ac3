use core::fmt;

use arcstr::ArcStr;
use minilog_wam::Signature;

/// A term of the source language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom { name: ArcStr },
    Variable { name: ArcStr },
    Structure(Structure),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom { name } => write!(f, "{name}"),
            Term::Variable { name } => write!(f, "{name}"),
            Term::Structure(structure) => write!(f, "{structure}"),
        }
    }
}

/// A compound term: a functor applied to zero or more arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    pub functor: ArcStr,
    pub args: Vec<Term>,
}

impl Structure {
    pub fn arity(&self) -> u8 {
        self.args.len() as u8
    }

    pub fn signature(&self) -> Signature {
        Signature {
            name: self.functor.clone(),
            arity: self.arity(),
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.functor)?;

        let mut args = self.args.iter();

        if let Some(arg) = args.next() {
            write!(f, "({arg}")?;
            args.try_for_each(|arg| write!(f, ", {arg}"))?;
            write!(f, ")")?;
        }

        Ok(())
    }
}

/// A fact or rule; an empty body makes it a fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub head: Structure,
    pub body: Vec<Term>,
}

/// A knowledge base together with the query to run against it.
#[derive(Debug, Clone)]
pub struct Program {
    pub clauses: Vec<Clause>,
    pub query: Vec<Term>,
}
