use core::fmt;

use arcstr::ArcStr;
use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use chumsky::{prelude::*, text::whitespace};

use super::ast::{Clause, Structure, Term};

/// Register allocation reserves a safe range above the argument registers,
/// so argument lists are capped.
pub const MAX_ARITY: usize = 15;

type ParseError = Simple<char>;

/// Parse failures, carrying enough context to render an ariadne report.
#[derive(Debug)]
pub struct ParseErrorReport {
    id: ArcStr,
    source: String,
    errors: Vec<ParseError>,
}

impl fmt::Display for ParseErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = &self.id;

        for error in &self.errors {
            let msg = if let chumsky::error::SimpleReason::Custom(msg) = error.reason() {
                msg.clone()
            } else {
                format!(
                    "{}{}, expected {}",
                    if error.found().is_some() {
                        "Unexpected token"
                    } else {
                        "Unexpected end of input"
                    },
                    if let Some(label) = error.label() {
                        format!(" while parsing {label}")
                    } else {
                        String::new()
                    },
                    if error.expected().len() == 0 {
                        "something else".to_string()
                    } else {
                        error
                            .expected()
                            .map(|expected| match expected {
                                Some(expected) => expected.to_string(),
                                None => "end of input".to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(", ")
                    },
                )
            };

            let report = Report::build(ReportKind::Error, id, error.span().start)
                .with_message(msg)
                .with_label(
                    Label::new((id, error.span()))
                        .with_message(match error.reason() {
                            chumsky::error::SimpleReason::Custom(msg) => msg.clone(),
                            _ => format!(
                                "Unexpected {}",
                                error
                                    .found()
                                    .map(|c| format!("token {}", c.fg(Color::Red)))
                                    .unwrap_or_else(|| "end of input".to_string())
                            ),
                        })
                        .with_color(Color::Red),
                );

            let report = match error.reason() {
                chumsky::error::SimpleReason::Unclosed { span, delimiter } => report.with_label(
                    Label::new((id, span.clone()))
                        .with_message(format!("Unclosed delimiter {}", delimiter.fg(Color::Yellow)))
                        .with_color(Color::Yellow),
                ),
                chumsky::error::SimpleReason::Unexpected => report,
                chumsky::error::SimpleReason::Custom(_) => report,
            };

            let mut buffer = Vec::new();

            report
                .finish()
                .write((id, Source::from(&self.source)), &mut buffer)
                .map_err(|_| fmt::Error)?;

            f.write_str(std::str::from_utf8(&buffer).map_err(|_| fmt::Error)?)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseErrorReport {}

fn lowercase(c: &char) -> bool {
    c.is_lowercase()
}

fn uppercase(c: &char) -> bool {
    c.is_uppercase()
}

fn ident(c: &char) -> bool {
    c.is_alphanumeric() || *c == '_'
}

fn name() -> impl Parser<char, ArcStr, Error = ParseError> {
    filter(lowercase)
        .chain(filter(ident).repeated())
        .collect::<String>()
        .map(ArcStr::from)
        .labelled("name")
}

fn variable() -> impl Parser<char, Term, Error = ParseError> {
    filter(uppercase)
        .chain(filter(ident).repeated())
        .collect::<String>()
        .map(ArcStr::from)
        .map(|name| Term::Variable { name })
        .labelled("variable")
}

fn structure(
    term: impl Parser<char, Term, Error = ParseError>,
) -> impl Parser<char, Structure, Error = ParseError> {
    name()
        .then_ignore(whitespace())
        .then(
            term.separated_by(just(',').padded())
                .padded()
                .delimited_by(just('('), just(')'))
                .or_not()
                .map(Option::unwrap_or_default),
        )
        .try_map(|(functor, args): (ArcStr, Vec<Term>), span| {
            if args.len() > MAX_ARITY {
                Err(Simple::custom(
                    span,
                    format!("{functor} has more than {MAX_ARITY} arguments"),
                ))
            } else {
                Ok(Structure { functor, args })
            }
        })
        .labelled("structure")
}

fn term() -> impl Parser<char, Term, Error = ParseError> {
    recursive(|term| {
        variable().or(structure(term).map(|structure| {
            if structure.args.is_empty() {
                Term::Atom {
                    name: structure.functor,
                }
            } else {
                Term::Structure(structure)
            }
        }))
    })
}

fn goals() -> impl Parser<char, Vec<Term>, Error = ParseError> {
    term().padded().separated_by(just(',')).at_least(1)
}

/// Parses a knowledge base: facts `head.` and rules `head :- goal, ….`.
pub fn parse_program(id: ArcStr, source: &str) -> Result<Vec<Clause>, ParseErrorReport> {
    let clause = structure(term())
        .then(
            just(":-")
                .padded()
                .ignore_then(goals())
                .or_not()
                .map(Option::unwrap_or_default),
        )
        .then_ignore(just('.'))
        .map(|(head, body)| Clause { head, body });

    clause
        .padded()
        .repeated()
        .then_ignore(end())
        .parse(source)
        .map_err(|errors| ParseErrorReport {
            id,
            source: source.to_owned(),
            errors,
        })
}

/// Parses a query: a goal sequence with an optional `?-` prefix.
pub fn parse_query(source: &str) -> Result<Vec<Term>, ParseErrorReport> {
    just("?-")
        .padded()
        .or_not()
        .ignore_then(goals())
        .then_ignore(just('.').padded())
        .then_ignore(end())
        .parse(source)
        .map_err(|errors| ParseErrorReport {
            id: arcstr::literal!("<query>"),
            source: source.to_owned(),
            errors,
        })
}

#[cfg(test)]
mod tests {
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

    fn parse(source: &str) -> Vec<Clause> {
        parse_program(arcstr::literal!("<test>"), source).unwrap()
    }

    #[test]
    fn parses_facts_and_rules() {
        let clauses = parse("parent(tom, bob).\nancestor(X, Y) :- parent(X, Y).");

        assert_eq!(
            clauses[0],
            Clause {
                head: Structure {
                    functor: ArcStr::from("parent"),
                    args: vec![atom("tom"), atom("bob")],
                },
                body: vec![],
            }
        );
        assert_eq!(
            clauses[1],
            Clause {
                head: Structure {
                    functor: ArcStr::from("ancestor"),
                    args: vec![variable("X"), variable("Y")],
                },
                body: vec![Term::Structure(Structure {
                    functor: ArcStr::from("parent"),
                    args: vec![variable("X"), variable("Y")],
                })],
            }
        );
    }

    #[test]
    fn parses_zero_arity_facts() {
        let clauses = parse("sunny.");

        assert_eq!(clauses[0].head.functor, "sunny");
        assert_eq!(clauses[0].head.arity(), 0);
    }

    #[test]
    fn parses_nested_structure_arguments() {
        let clauses = parse("likes(tom, food(cheese)).");

        let Term::Structure(nested) = &clauses[0].head.args[1] else {
            panic!("expected a structure argument");
        };
        assert_eq!(nested.functor, "food");
        assert_eq!(nested.args, vec![atom("cheese")]);
    }

    #[test]
    fn the_query_prefix_is_optional() {
        let with_prefix = parse_query("?- parent(tom, X).").unwrap();
        let without_prefix = parse_query("parent(tom, X).").unwrap();

        assert_eq!(with_prefix, without_prefix);
        assert_eq!(with_prefix.len(), 1);
    }

    #[test]
    fn parses_conjunctive_queries() {
        let goals = parse_query("parent(tom, X), parent(X, Y).").unwrap();

        assert_eq!(goals.len(), 2);
    }

    #[test]
    fn rejects_argument_lists_over_the_register_limit() {
        let args = (0..=MAX_ARITY).map(|_| "a").collect::<Vec<_>>().join(", ");

        assert!(parse_program(arcstr::literal!("<test>"), &format!("p({args}).")).is_err());
    }

    #[test]
    fn rejects_a_variable_clause_head() {
        assert!(parse_program(arcstr::literal!("<test>"), "X :- p.").is_err());
    }

    #[test]
    fn reports_a_missing_full_stop() {
        assert!(parse_query("parent(tom, X)").is_err());
    }
}
