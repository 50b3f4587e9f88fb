use std::fmt::{Debug, Formatter};

use nom::IResult;
use nom::bytes::complete::take_till;
use nom::character::complete::{char, digit1};
use nom::combinator::{all_consuming, map_res};
use nom::error::{ErrorKind, FromExternalError, ParseError};
use nom::sequence::{preceded, tuple};

pub enum ParserError<I> {
    Custom(String),
    Nom(I, ErrorKind),
}

impl<I: Debug> Debug for ParserError<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom(error) => f.write_fmt(format_args!("Semantic error at {error}")),
            Self::Nom(input, error) => f.write_fmt(format_args!(
                "Parser error at '{input:?}': expecting {error:?}"
            )),
        }
    }
}

impl<I> ParseError<I> for ParserError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        ParserError::Nom(input, kind)
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<I: std::fmt::Display, E: std::fmt::Display> FromExternalError<I, E> for ParserError<I> {
    fn from_external_error(input: I, _: ErrorKind, error: E) -> Self {
        ParserError::Custom(format!("'{input}': {error}"))
    }
}

pub(crate) fn format_parse_error<I: Debug>(error: nom::Err<ParserError<I>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => format!("{e:?}"),
        nom::Err::Incomplete(_) => "Incomplete input".to_string(),
    }
}

pub type NomResult<'a, Ret> = IResult<&'a str, Ret, ParserError<&'a str>>;

pub fn p_u64(input: &str) -> NomResult<'_, u64> {
    map_res(digit1, |number: &str| number.parse::<u64>())(input)
}

/// Parses `<major>.<minor>.<patch>`, nothing else may follow.
pub fn p_version_triplet(input: &str) -> NomResult<'_, (u64, u64, u64)> {
    all_consuming(tuple((
        p_u64,
        preceded(char('.'), p_u64),
        preceded(char('.'), p_u64),
    )))(input)
}

/// Skips everything up to the first run of decimal digits and returns that run.
fn p_first_digit_run(input: &str) -> NomResult<'_, &str> {
    preceded(take_till(|c: char| c.is_ascii_digit()), digit1)(input)
}

/// Recovers a job id from the standard output of a scheduler submit command.
///
/// Only the first line is inspected. The first run of digits on it is the job id, any text around
/// it is ignored (`Submitted batch job 12345` -> `12345`).
pub fn parse_job_id(output: &str) -> Option<&str> {
    let line = output.lines().next()?;
    p_first_digit_run(line).ok().map(|(_, id)| id)
}
