use std::{io::Stdout, path::PathBuf};

use anyhow::Context;
use arcstr::ArcStr;
use clap::Parser;
use crossterm::{
    event::{Event, KeyCode, KeyEvent, KeyEventKind},
    style::{style, Print, Stylize},
    ExecutableCommand,
};
use itertools::Itertools;
use minilog_wam::{Label, Limits, Machine, RunOutcome, Signature};

mod compiler;
mod optimizer;

use compiler::ast::{Clause, Program, Term};
use compiler::{Compilation, QueryInfo};

#[derive(Parser)]
struct Cli {
    /// The knowledge base to consult
    knowledge_base: PathBuf,
}

fn known_predicates(compilation: &Compilation) -> impl Iterator<Item = &Signature> {
    compilation.labels.keys().filter_map(|label| match label {
        Label::Predicate(signature) => Some(signature),
        Label::Retry { .. } => None,
    })
}

fn warn_if_unknown(compilation: &Compilation) {
    let Some(goal) = &compilation.query.goal else {
        return;
    };
    if compilation
        .labels
        .contains_key(&Label::Predicate(goal.clone()))
    {
        return;
    }

    let suggestion = known_predicates(compilation)
        .map(|candidate| {
            let score = strsim::jaro_winkler(&goal.to_string(), &candidate.to_string());
            (candidate, score)
        })
        .filter(|&(_, score)| score > 0.8)
        .max_by(|(_, left), (_, right)| left.total_cmp(right))
        .map(|(candidate, _)| candidate);

    match suggestion {
        Some(candidate) => log::warn!("unknown predicate {goal}; did you mean {candidate}?"),
        None => log::warn!("unknown predicate {goal}"),
    }
}

fn bindings(machine: &Machine, query: &QueryInfo) -> String {
    query
        .variables
        .iter()
        .filter_map(|(name, address)| {
            machine
                .heap_value(*address)
                .map(|value| format!("{name} = {value}"))
        })
        .join(", ")
}

/// Blocks until the user either asks for the next solution (space or `;`) or
/// settles for the current one (enter or escape).
fn wants_another_solution(stdout: &mut Stdout) -> anyhow::Result<bool> {
    loop {
        if let Event::Key(KeyEvent {
            code,
            kind: KeyEventKind::Press,
            ..
        }) = crossterm::event::read()?
        {
            match code {
                KeyCode::Char(' ') | KeyCode::Char(';') => {
                    stdout.execute(Print(" ;\n"))?;
                    return Ok(true);
                }
                KeyCode::Esc | KeyCode::Enter => {
                    stdout.execute(Print(".\n"))?;
                    return Ok(false);
                }
                _ => continue,
            }
        }
    }
}

fn run_query(
    machine: &mut Machine,
    clauses: &[Clause],
    query: Vec<Term>,
    stdout: &mut Stdout,
) -> anyhow::Result<()> {
    let program = optimizer::optimize(Program {
        clauses: clauses.to_vec(),
        query,
    });
    let compilation = compiler::compile(&program);
    warn_if_unknown(&compilation);

    let Compilation {
        code,
        labels,
        query,
    } = compilation;
    machine.load(code, labels);

    let mut outcome = machine.run();

    loop {
        match outcome {
            Err(error) => {
                stdout.execute(Print(style(format_args!("error: {error}")).red()))?;
                stdout.execute(Print("\n"))?;
                return Ok(());
            }
            Ok(RunOutcome::Failure) => {
                stdout.execute(Print("false".bold()))?;
                stdout.execute(Print(".\n"))?;
                return Ok(());
            }
            Ok(RunOutcome::Success) => {
                let answer = bindings(machine, &query);
                if answer.is_empty() {
                    stdout.execute(Print("true".bold()))?;
                } else {
                    stdout.execute(Print(answer))?;
                }

                if machine.has_choices() {
                    if !wants_another_solution(stdout)? {
                        return Ok(());
                    }
                    outcome = machine.next_solution();
                } else {
                    stdout.execute(Print(".\n"))?;
                    return Ok(());
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let Cli { knowledge_base } = Cli::parse();

    let source = std::fs::read_to_string(&knowledge_base)
        .with_context(|| format!("failed to read {}", knowledge_base.display()))?;
    let id = ArcStr::from(knowledge_base.display().to_string());

    let clauses = match compiler::parser::parse_program(id, &source) {
        Ok(clauses) => clauses,
        Err(report) => anyhow::bail!("{report}"),
    };

    log::info!("consulted {} clauses", clauses.len());

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut machine = Machine::new(Limits::default());

    loop {
        stdout.execute(Print("?- "))?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit." || line == "halt." {
            break;
        }

        match compiler::parser::parse_query(line) {
            Ok(query) => run_query(&mut machine, &clauses, query, &mut stdout)?,
            Err(report) => {
                stdout.execute(Print(format_args!("{report}\n")))?;
            }
        }
    }

    Ok(())
}
