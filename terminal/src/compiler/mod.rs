use std::collections::HashMap;

pub(crate) mod ast;
pub(crate) mod parser;

use arcstr::ArcStr;
use minilog_wam::{Address, Ai, CodeAddress, Instruction, Label, LabelTable, Signature};

use ast::{Clause, Program, Term};

/// First register of the range that rule bodies may not clobber. Body goals
/// reuse A1..An, so head variables move here before any call.
const SAFE_REGISTER_BASE: u8 = 16;

/// The output of compiling a knowledge base plus its query.
pub struct Compilation {
    pub code: Vec<Instruction>,
    pub labels: LabelTable,
    pub query: QueryInfo,
}

/// What the driver needs to know about the compiled query.
pub struct QueryInfo {
    /// Signature of the goal the entry sequence calls, if it calls one.
    pub goal: Option<Signature>,
    /// Query variables in first-occurrence order, with their heap cells.
    ///
    /// The entry sequence runs against a fresh heap and put_variable is its
    /// only allocating instruction, so the nth query variable lives at heap
    /// address n. Rule bodies may clobber argument registers, but these
    /// cells outlive the whole run.
    pub variables: Vec<(ArcStr, Address)>,
}

#[derive(Clone, Copy)]
enum Mode {
    Build,
    Match,
}

/// Clause-local register assignments. A fresh context starts at every clause
/// and at the query, so no state leaks between compilations.
#[derive(Default)]
struct ClauseContext {
    variables: Vec<(ArcStr, Ai)>,
}

impl ClauseContext {
    fn lookup(&self, name: &str) -> Option<Ai> {
        self.variables
            .iter()
            .find_map(|(variable, ai)| (variable == name).then_some(*ai))
    }

    fn record(&mut self, name: ArcStr, ai: Ai) {
        self.variables.push((name, ai));
    }
}

struct CodeBuffer {
    code: Vec<Instruction>,
    labels: LabelTable,
}

impl CodeBuffer {
    fn new() -> Self {
        Self {
            code: Vec::new(),
            labels: LabelTable::new(),
        }
    }

    fn here(&self) -> CodeAddress {
        CodeAddress(self.code.len() as u16)
    }

    fn emit(&mut self, instruction: Instruction) {
        self.code.push(instruction);
    }

    fn define(&mut self, label: Label) {
        let address = self.here();
        self.labels.insert(label, address);
    }
}

/// Compiles the whole program: the query's entry sequence first, then every
/// predicate's clauses, grouped in first-appearance order.
pub fn compile(program: &Program) -> Compilation {
    let mut buffer = CodeBuffer::new();

    let query = compile_query(&mut buffer, &program.query);

    for (signature, clauses) in group_clauses(&program.clauses) {
        compile_predicate(&mut buffer, signature, &clauses);
    }

    Compilation {
        code: buffer.code,
        labels: buffer.labels,
        query,
    }
}

fn group_clauses(clauses: &[Clause]) -> Vec<(Signature, Vec<&Clause>)> {
    let mut groups: Vec<(Signature, Vec<&Clause>)> = Vec::new();
    let mut positions: HashMap<Signature, usize> = HashMap::new();

    for clause in clauses {
        let signature = clause.head.signature();
        match positions.get(&signature).copied() {
            Some(position) => groups[position].1.push(clause),
            None => {
                positions.insert(signature.clone(), groups.len());
                groups.push((signature, vec![clause]));
            }
        }
    }

    groups
}

fn argument_register(index: usize) -> Ai {
    Ai(index as u8 + 1)
}

fn compile_query(buffer: &mut CodeBuffer, goals: &[Term]) -> QueryInfo {
    let mut context = ClauseContext::default();

    // Only the first goal reaches the entry sequence; conjunctive queries are
    // not chained.
    let goal = match goals.first() {
        Some(Term::Structure(structure)) => {
            for (index, arg) in structure.args.iter().enumerate() {
                compile_term(buffer, &mut context, arg, argument_register(index), Mode::Build);
            }
            let signature = structure.signature();
            buffer.emit(Instruction::Call {
                label: Label::Predicate(signature.clone()),
            });
            Some(signature)
        }
        Some(Term::Atom { name }) => {
            let signature = Signature {
                name: name.clone(),
                arity: 0,
            };
            buffer.emit(Instruction::Call {
                label: Label::Predicate(signature.clone()),
            });
            Some(signature)
        }
        // A variable cannot name a predicate; the entry sequence is a no-op.
        Some(Term::Variable { .. }) | None => None,
    };

    buffer.emit(Instruction::Halt);

    let variables = context
        .variables
        .into_iter()
        .zip(0..)
        .map(|((name, _), address)| (name, Address(address)))
        .collect();

    QueryInfo { goal, variables }
}

fn compile_term(
    buffer: &mut CodeBuffer,
    context: &mut ClauseContext,
    term: &Term,
    ai: Ai,
    mode: Mode,
) {
    match term {
        Term::Atom { name } => buffer.emit(match mode {
            Mode::Build => Instruction::PutConstant {
                ai,
                name: name.clone(),
            },
            Mode::Match => Instruction::GetConstant {
                ai,
                name: name.clone(),
            },
        }),
        Term::Variable { name } => match context.lookup(name) {
            Some(source) => buffer.emit(match mode {
                Mode::Build => Instruction::PutValue { ai, source },
                Mode::Match => Instruction::GetValue { ai, source },
            }),
            None => {
                context.record(name.clone(), ai);
                buffer.emit(match mode {
                    Mode::Build => Instruction::PutVariable { ai },
                    Mode::Match => Instruction::GetVariable { ai },
                });
            }
        },
        // Shallow: the signature is carried, the arguments are not.
        Term::Structure(structure) => buffer.emit(match mode {
            Mode::Build => Instruction::PutStructure {
                ai,
                signature: structure.signature(),
            },
            Mode::Match => Instruction::GetStructure {
                ai,
                signature: structure.signature(),
            },
        }),
    }
}

fn retry_label(predicate: &Signature, clause: u8) -> Label {
    Label::Retry {
        predicate: predicate.clone(),
        clause,
    }
}

fn compile_predicate(buffer: &mut CodeBuffer, signature: Signature, clauses: &[&Clause]) {
    buffer.define(Label::Predicate(signature.clone()));

    if let [clause] = clauses {
        // A single clause needs no choice instructions.
        compile_clause(buffer, clause);
        return;
    }

    let last = clauses.len() - 1;
    for (index, clause) in clauses.iter().enumerate() {
        if index == 0 {
            buffer.emit(Instruction::TryMeElse {
                label: retry_label(&signature, 1),
            });
        } else if index < last {
            buffer.emit(Instruction::RetryMeElse {
                label: retry_label(&signature, index as u8 + 1),
            });
        } else {
            buffer.emit(Instruction::TrustMe);
        }

        compile_clause(buffer, clause);

        if index < last {
            buffer.define(retry_label(&signature, index as u8 + 1));
        }
    }
}

fn compile_clause(buffer: &mut CodeBuffer, clause: &Clause) {
    let mut context = ClauseContext::default();
    let head = &clause.head;

    if !clause.body.is_empty() {
        buffer.emit(Instruction::Allocate);

        for (index, arg) in head.args.iter().enumerate() {
            if let Term::Variable { name } = arg {
                if context.lookup(name).is_none() {
                    let safe = Ai(SAFE_REGISTER_BASE + index as u8);
                    context.record(name.clone(), safe);
                    buffer.emit(Instruction::PutValue {
                        ai: safe,
                        source: argument_register(index),
                    });
                }
            }
        }
    }

    // Variables were captured above (rules) or are left unconstrained
    // (facts); only the remaining argument shapes are matched.
    for (index, arg) in head.args.iter().enumerate() {
        if !matches!(arg, Term::Variable { .. }) {
            compile_term(buffer, &mut context, arg, argument_register(index), Mode::Match);
        }
    }

    if clause.body.is_empty() {
        buffer.emit(Instruction::Proceed);
    } else {
        for goal in &clause.body {
            match goal {
                Term::Structure(structure) => {
                    for (index, arg) in structure.args.iter().enumerate() {
                        compile_term(
                            buffer,
                            &mut context,
                            arg,
                            argument_register(index),
                            Mode::Build,
                        );
                    }
                    buffer.emit(Instruction::Call {
                        label: Label::Predicate(structure.signature()),
                    });
                }
                Term::Atom { name } => {
                    buffer.emit(Instruction::Call {
                        label: Label::Predicate(Signature {
                            name: name.clone(),
                            arity: 0,
                        }),
                    });
                }
                // A variable cannot name a predicate; nothing to emit.
                Term::Variable { .. } => (),
            }
        }
        buffer.emit(Instruction::Deallocate);
    }
}

#[cfg(test)]
mod tests {
    use minilog_wam::{Cell, Limits, Machine, RunOutcome};

    use super::ast::Structure;
    use super::*;

    fn atom(name: &str) -> Term {
        Term::Atom {
            name: ArcStr::from(name),
        }
    }

    fn variable(name: &str) -> Term {
        Term::Variable {
            name: ArcStr::from(name),
        }
    }

    fn structure(functor: &str, args: Vec<Term>) -> Structure {
        Structure {
            functor: ArcStr::from(functor),
            args,
        }
    }

    fn fact(functor: &str, args: Vec<Term>) -> Clause {
        Clause {
            head: structure(functor, args),
            body: vec![],
        }
    }

    fn signature(name: &str, arity: u8) -> Signature {
        Signature {
            name: ArcStr::from(name),
            arity,
        }
    }

    #[test]
    fn grouping_preserves_first_appearance_order() {
        let clauses = vec![
            fact("p", vec![atom("a")]),
            fact("q", vec![atom("a")]),
            fact("p", vec![atom("b")]),
        ];

        let groups = group_clauses(&clauses);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, signature("p", 1));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, signature("q", 1));
    }

    #[test]
    fn a_single_clause_predicate_has_no_choice_instructions() {
        let program = Program {
            clauses: vec![fact("parent", vec![atom("tom"), atom("bob")])],
            query: vec![Term::Structure(structure(
                "parent",
                vec![atom("tom"), atom("bob")],
            ))],
        };

        let compilation = compile(&program);

        assert!(!compilation.code.iter().any(|instruction| matches!(
            instruction,
            Instruction::TryMeElse { .. } | Instruction::RetryMeElse { .. } | Instruction::TrustMe
        )));
        assert!(compilation
            .labels
            .contains_key(&Label::Predicate(signature("parent", 2))));
    }

    #[test]
    fn a_choice_chain_links_each_clause_to_the_next() {
        let program = Program {
            clauses: vec![
                fact("p", vec![atom("a")]),
                fact("p", vec![atom("b")]),
                fact("p", vec![atom("c")]),
            ],
            query: vec![Term::Structure(structure("p", vec![variable("X")]))],
        };

        let compilation = compile(&program);
        let p = signature("p", 1);

        // Entry sequence: put_variable, call, halt.
        assert_eq!(compilation.code[2], Instruction::Halt);
        assert_eq!(
            compilation.labels[&Label::Predicate(p.clone())],
            CodeAddress(3)
        );

        assert_eq!(
            compilation.code[3],
            Instruction::TryMeElse {
                label: retry_label(&p, 1)
            }
        );
        assert_eq!(
            compilation.code[compilation.labels[&retry_label(&p, 1)].index()],
            Instruction::RetryMeElse {
                label: retry_label(&p, 2)
            }
        );
        assert_eq!(
            compilation.code[compilation.labels[&retry_label(&p, 2)].index()],
            Instruction::TrustMe
        );
    }

    #[test]
    fn the_query_compiles_only_its_first_goal() {
        let program = Program {
            clauses: vec![],
            query: vec![
                Term::Structure(structure("p", vec![variable("X")])),
                Term::Structure(structure("q", vec![variable("X")])),
            ],
        };

        let compilation = compile(&program);

        let calls = compilation
            .code
            .iter()
            .filter(|instruction| matches!(instruction, Instruction::Call { .. }))
            .count();
        assert_eq!(calls, 1);
        assert_eq!(compilation.code.last(), Some(&Instruction::Halt));
        assert_eq!(compilation.query.goal, Some(signature("p", 1)));
    }

    #[test]
    fn query_variables_are_recorded_in_first_occurrence_order() {
        let program = Program {
            clauses: vec![],
            query: vec![Term::Structure(structure(
                "p",
                vec![variable("X"), variable("Y"), variable("X")],
            ))],
        };

        let compilation = compile(&program);

        assert_eq!(
            compilation.query.variables,
            vec![
                (ArcStr::from("X"), Address(0)),
                (ArcStr::from("Y"), Address(1))
            ]
        );
        assert_eq!(
            compilation.code[2],
            Instruction::PutValue {
                ai: Ai(3),
                source: Ai(1)
            }
        );
    }

    #[test]
    fn a_rule_saves_head_variables_before_body_calls() {
        // grandparent(X, Z) :- parent(X, Y), parent(Y, Z).
        let rule = Clause {
            head: structure("grandparent", vec![variable("X"), variable("Z")]),
            body: vec![
                Term::Structure(structure("parent", vec![variable("X"), variable("Y")])),
                Term::Structure(structure("parent", vec![variable("Y"), variable("Z")])),
            ],
        };
        let program = Program {
            clauses: vec![rule],
            query: vec![],
        };

        let compilation = compile(&program);
        let parent = Label::Predicate(signature("parent", 2));

        // Entry sequence is a bare halt; the clause starts right after it.
        assert_eq!(
            compilation.code[1..],
            [
                Instruction::Allocate,
                Instruction::PutValue {
                    ai: Ai(16),
                    source: Ai(1)
                },
                Instruction::PutValue {
                    ai: Ai(17),
                    source: Ai(2)
                },
                Instruction::PutValue {
                    ai: Ai(1),
                    source: Ai(16)
                },
                Instruction::PutVariable { ai: Ai(2) },
                Instruction::Call {
                    label: parent.clone()
                },
                Instruction::PutValue {
                    ai: Ai(1),
                    source: Ai(2)
                },
                Instruction::PutValue {
                    ai: Ai(2),
                    source: Ai(17)
                },
                Instruction::Call { label: parent },
                Instruction::Deallocate,
            ]
        );
    }

    #[test]
    fn fact_heads_match_constants_and_leave_variables_unconstrained() {
        let program = Program {
            clauses: vec![fact("parent", vec![atom("tom"), variable("X")])],
            query: vec![],
        };

        let compilation = compile(&program);

        assert_eq!(
            compilation.code[1..],
            [
                Instruction::GetConstant {
                    ai: Ai(1),
                    name: ArcStr::from("tom")
                },
                Instruction::Proceed,
            ]
        );
    }

    #[test]
    fn match_mode_terms_mirror_build_mode() {
        let mut buffer = CodeBuffer::new();
        let mut context = ClauseContext::default();

        compile_term(&mut buffer, &mut context, &atom("tom"), Ai(1), Mode::Match);
        compile_term(&mut buffer, &mut context, &variable("X"), Ai(2), Mode::Match);
        compile_term(&mut buffer, &mut context, &variable("X"), Ai(3), Mode::Match);
        compile_term(
            &mut buffer,
            &mut context,
            &Term::Structure(structure("f", vec![atom("a")])),
            Ai(4),
            Mode::Match,
        );

        assert_eq!(
            buffer.code,
            [
                Instruction::GetConstant {
                    ai: Ai(1),
                    name: ArcStr::from("tom")
                },
                Instruction::GetVariable { ai: Ai(2) },
                Instruction::GetValue {
                    ai: Ai(3),
                    source: Ai(2)
                },
                Instruction::GetStructure {
                    ai: Ai(4),
                    signature: signature("f", 1)
                },
            ]
        );
    }

    // End-to-end: parser -> optimizer -> compiler -> machine.

    fn ask(knowledge_base: &str, query: &str, limits: Limits) -> (Machine, QueryInfo) {
        let clauses = parser::parse_program(arcstr::literal!("<test>"), knowledge_base).unwrap();
        let query = parser::parse_query(query).unwrap();
        let program = crate::optimizer::optimize(Program { clauses, query });
        let compilation = compile(&program);

        let mut machine = Machine::new(limits);
        machine.load(compilation.code, compilation.labels);
        (machine, compilation.query)
    }

    fn binding(machine: &Machine, query: &QueryInfo, name: &str) -> Option<Cell> {
        let (_, address) = query
            .variables
            .iter()
            .find(|(variable, _)| variable == name)?;
        machine.heap_value(*address)
    }

    #[test]
    fn a_ground_query_against_a_matching_fact_is_true() {
        let (mut machine, _) = ask(
            "parent(tom, bob).",
            "parent(tom, bob).",
            Limits::default(),
        );

        assert_eq!(machine.run().unwrap(), RunOutcome::Success);
        assert!(!machine.has_choices());
    }

    #[test]
    fn a_query_variable_enumerates_every_matching_fact() {
        let (mut machine, query) = ask(
            "parent(tom, bob). parent(tom, liz).",
            "parent(tom, X).",
            Limits::default(),
        );

        assert_eq!(machine.run().unwrap(), RunOutcome::Success);
        assert_eq!(
            binding(&machine, &query, "X"),
            Some(Cell::Constant(ArcStr::from("bob")))
        );

        assert_eq!(machine.next_solution().unwrap(), RunOutcome::Success);
        assert_eq!(
            binding(&machine, &query, "X"),
            Some(Cell::Constant(ArcStr::from("liz")))
        );

        assert_eq!(machine.next_solution().unwrap(), RunOutcome::Failure);
    }

    #[test]
    fn a_rule_body_chains_through_its_goals() {
        let (mut machine, query) = ask(
            "parent(tom, bob). parent(bob, ann). \
             grandparent(X, Z) :- parent(X, Y), parent(Y, Z).",
            "grandparent(tom, Z).",
            Limits::default(),
        );

        assert_eq!(machine.run().unwrap(), RunOutcome::Success);
        assert_eq!(
            binding(&machine, &query, "Z"),
            Some(Cell::Constant(ArcStr::from("ann")))
        );
    }

    #[test]
    fn an_unknown_predicate_is_false_not_a_crash() {
        let (mut machine, _) = ask("parent(tom, bob).", "unknown(x).", Limits::default());

        assert_eq!(machine.run().unwrap(), RunOutcome::Failure);
    }

    #[test]
    fn a_recursive_predicate_enumerates_each_solution_once() {
        let (mut machine, query) = ask(
            "edge(a, b). edge(b, c). \
             path(X, Y) :- edge(X, Y). \
             path(X, Y) :- edge(X, Z), path(Z, Y).",
            "path(a, X).",
            Limits::default(),
        );

        assert_eq!(machine.run().unwrap(), RunOutcome::Success);
        assert_eq!(
            binding(&machine, &query, "X"),
            Some(Cell::Constant(ArcStr::from("b")))
        );

        assert_eq!(machine.next_solution().unwrap(), RunOutcome::Success);
        assert_eq!(
            binding(&machine, &query, "X"),
            Some(Cell::Constant(ArcStr::from("c")))
        );

        assert_eq!(machine.next_solution().unwrap(), RunOutcome::Failure);
    }

    #[test]
    fn tiny_limits_surface_as_explicit_exhaustion_errors() {
        let (mut machine, _) = ask(
            "edge(a, b). edge(b, c). \
             path(X, Y) :- edge(X, Y). \
             path(X, Y) :- edge(X, Z), path(Z, Y).",
            "path(a, X).",
            Limits {
                frames: 1,
                ..Limits::default()
            },
        );

        // The first solution fits in one frame; the recursive clause does not.
        assert_eq!(machine.run().unwrap(), RunOutcome::Success);
        assert!(matches!(
            machine.next_solution(),
            Err(minilog_wam::ExecutionError::TooManyFrames { capacity: 1 })
        ));
    }
}
