//! Clause reordering ahead of compilation.

use minilog_wam::Signature;

use crate::compiler::ast::{Clause, Program};

/// Brings each predicate's clauses together so every choice chain compiles
/// contiguously, preserving the order in which predicates first appear and
/// the relative order of clauses within a predicate. Semantically
/// transparent: the compiler groups by signature either way.
pub fn optimize(program: Program) -> Program {
    let Program { clauses, query } = program;

    let mut groups: Vec<(Signature, Vec<Clause>)> = Vec::new();

    for clause in clauses {
        let signature = clause.head.signature();
        match groups.iter().position(|(other, _)| *other == signature) {
            Some(position) => groups[position].1.push(clause),
            None => groups.push((signature, vec![clause])),
        }
    }

    let clauses = groups.into_iter().flat_map(|(_, group)| group).collect();

    Program { clauses, query }
}
