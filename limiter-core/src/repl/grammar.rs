//! Remote command lexer and parser.
//!
//! `regal` splits a line into at most [`MAX_TOKENS`] tokens. The parser then
//! looks up the leading word in the catalog and walks that command's node
//! graph with small `winnow` steps over the token slice, collecting operands
//! into a [`Draft`]. Operand ranges are left to the executor.

use core::fmt;
use core::ops::Range;

use heapless::Vec;
use regal::{IncrementalError, TokenCache};
use regal_macros::RegalLexer;
use winnow::error::ErrMode;
use winnow::prelude::*;

use super::catalog::{self, ChoiceBranch, ChoiceTag, CommandTag, IntegerTag, Node};

/// Longest accepted command, in tokens.
pub const MAX_TOKENS: usize = 16;
// Skipped blanks occupy cache records too.
const CACHE_RECORDS: usize = MAX_TOKENS * 2;

#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Symbol {
    #[regex(r"[0-9]+")]
    Number,
    /// Command names and keywords. Case is folded at lookup.
    #[regex(r"[A-Za-z][A-Za-z0-9_-]*")]
    Word,
    #[regex(r"[ \t]+", skip)]
    Blank,
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    LineEnd,
    /// Anything the remote grammar has no use for.
    #[default]
    #[regex(r".", priority = 1024)]
    Stray,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub symbol: Symbol,
    pub text: &'a str,
    /// Byte range in the source line.
    pub span: Range<usize>,
}

impl Token<'_> {
    fn is(&self, symbol: Symbol) -> bool {
        self.symbol == symbol
    }
}

pub type Tokens<'a> = Vec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanError {
    /// The line holds more than [`MAX_TOKENS`] tokens.
    Overflow,
    Engine,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Overflow => write!(f, "more than {MAX_TOKENS} tokens"),
            ScanError::Engine => f.write_str("lexer failure"),
        }
    }
}

/// Why a tokenized line is not a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyntaxError<'a> {
    UnknownCommand(&'a str),
    Expected {
        what: &'static str,
        found: &'a str,
        at: usize,
    },
    Missing(&'static str),
    BadNumber(&'a str),
    Stray {
        text: &'a str,
        at: usize,
    },
}

impl<'a> SyntaxError<'a> {
    /// `what` was wanted where `token` sits. A line end counts as nothing.
    fn at(what: &'static str, token: Option<&Token<'a>>) -> Self {
        match token {
            Some(token) if !token.is(Symbol::LineEnd) => SyntaxError::Expected {
                what,
                found: token.text,
                at: token.span.start,
            },
            _ => SyntaxError::Missing(what),
        }
    }
}

impl fmt::Display for SyntaxError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::UnknownCommand(name) => write!(f, "unknown command {name}"),
            SyntaxError::Expected { what, found, .. } => write!(f, "expected {what}, found {found}"),
            SyntaxError::Missing(what) => write!(f, "missing {what}"),
            SyntaxError::BadNumber(text) => write!(f, "invalid number {text}"),
            SyntaxError::Stray { text, at } => write!(f, "unsupported character `{text}` at {at}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Scan(ScanError),
    Syntax(SyntaxError<'a>),
}

impl From<ScanError> for ParseError<'_> {
    fn from(error: ScanError) -> Self {
        ParseError::Scan(error)
    }
}

impl<'a> From<SyntaxError<'a>> for ParseError<'a> {
    fn from(error: SyntaxError<'a>) -> Self {
        ParseError::Syntax(error)
    }
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Scan(error) => error.fmt(f),
            ParseError::Syntax(error) => error.fmt(f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Store { slot: u32, value: StoreValue },
    Read(ReadTarget),
    Calibrate,
    CompareTest { milliamps: u32 },
    BackEmf(BackEmfAction),
    CurrentSweep,
    Exit { diagnostics: bool },
    Status,
    Help { topic: Option<&'a str> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreValue {
    Milliamps(u32),
    /// Mark the slot as the boot default instead of writing a limit.
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadTarget {
    Slot(u32),
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackEmfAction {
    On,
    Off,
    Check,
}

/// Splits `line` into tokens, dropping blanks. Unmatched input ends up as a
/// trailing [`Symbol::Stray`] token rather than an error.
pub fn lex(line: &str) -> Result<Tokens<'_>, ScanError> {
    let mut cache: TokenCache<Symbol, CACHE_RECORDS> = TokenCache::new();
    let tail = cache
        .rebuild(Symbol::lexer(), line)
        .map_err(|error| match error {
            IncrementalError::TokenOverflow => ScanError::Overflow,
            _ => ScanError::Engine,
        })?;

    let mut tokens = Tokens::new();
    for record in cache.tokens() {
        if record.skipped {
            continue;
        }
        let span = record.start..record.end;
        let token = Token {
            symbol: record.token,
            text: &line[span.clone()],
            span,
        };
        tokens.push(token).map_err(|_| ScanError::Overflow)?;
    }

    if let Some(tail) = tail.filter(|tail| !tail.fragment.is_empty()) {
        let token = Token {
            symbol: Symbol::Stray,
            text: tail.fragment,
            span: tail.start..tail.start + tail.fragment.len(),
        };
        tokens.push(token).map_err(|_| ScanError::Overflow)?;
    }
    Ok(tokens)
}

/// Parses one remote command line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line)?;
    if let Some(stray) = tokens.iter().find(|token| token.is(Symbol::Stray)) {
        return Err(SyntaxError::Stray {
            text: stray.text,
            at: stray.span.start,
        }
        .into());
    }

    let mut input = tokens.as_slice();
    let command = command.parse_next(&mut input).map_err(settle)?;
    match input.iter().find(|token| !token.is(Symbol::LineEnd)) {
        Some(extra) => Err(SyntaxError::at("end of line", Some(extra)).into()),
        None => Ok(command),
    }
}

type Step<'a, T> = Result<T, ErrMode<SyntaxError<'a>>>;

fn settle(error: ErrMode<SyntaxError<'_>>) -> SyntaxError<'_> {
    match error {
        ErrMode::Backtrack(error) | ErrMode::Cut(error) => error,
        ErrMode::Incomplete(_) => SyntaxError::Missing("token"),
    }
}

fn reject<'a, T>(what: &'static str, token: Option<&Token<'a>>) -> Step<'a, T> {
    Err(ErrMode::Backtrack(SyntaxError::at(what, token)))
}

/// Consumes the next token if it carries `symbol`.
fn take<'a>(input: &mut &[Token<'a>], symbol: Symbol) -> Option<Token<'a>> {
    let tokens = *input;
    let (first, rest) = tokens.split_first()?;
    if !first.is(symbol) {
        return None;
    }
    *input = rest;
    Some(first.clone())
}

/// Consumes the next token if it is a word naming one of `branches`.
fn keyword(input: &mut &[Token<'_>], branches: &'static [ChoiceBranch]) -> Option<&'static ChoiceBranch> {
    let tokens = *input;
    let (first, rest) = tokens.split_first()?;
    if !first.is(Symbol::Word) {
        return None;
    }
    let branch = branches
        .iter()
        .find(|branch| branch.keyword.eq_ignore_ascii_case(first.text))?;
    *input = rest;
    Some(branch)
}

/// True while something other than the line end is left to read.
fn has_operand(input: &[Token<'_>]) -> bool {
    input.first().is_some_and(|token| !token.is(Symbol::LineEnd))
}

fn expect<'t, 'a>(symbol: Symbol, what: &'static str) -> impl Parser<&'t [Token<'a>], Token<'a>, ErrMode<SyntaxError<'a>>>
where
    'a: 't,
{
    move |input: &mut &'t [Token<'a>]| match take(input, symbol) {
        Some(token) => Ok(token),
        None => reject(what, input.first()),
    }
}

fn command<'a>(input: &mut &[Token<'a>]) -> Step<'a, Command<'a>> {
    let name = expect(Symbol::Word, "command")
        .map(|token| token.text)
        .parse_next(input)?;
    let entry = catalog::find(name).ok_or(ErrMode::Cut(SyntaxError::UnknownCommand(name)))?;
    let mut draft = Draft::new(entry.tag);
    walk(entry.grammar, input, &mut draft)?;
    draft.finish()
}

fn walk<'a>(node: &'static Node, input: &mut &[Token<'a>], draft: &mut Draft<'a>) -> Step<'a, ()> {
    match *node {
        Node::End => Ok(()),
        Node::Choice { choices, required } => match keyword(input, choices) {
            Some(branch) => {
                draft.keyword = Some(branch.tag);
                walk(branch.next, input, draft)
            }
            None if required || has_operand(input) => reject(first_keyword(choices), input.first()),
            None => Ok(()),
        },
        Node::Integer {
            tag,
            alternatives,
            next,
        } => {
            if let Some(token) = take(input, Symbol::Number) {
                let value = token
                    .text
                    .parse::<u32>()
                    .map_err(|_| ErrMode::Cut(SyntaxError::BadNumber(token.text)))?;
                draft.number(tag, value);
                walk(next, input, draft)
            } else if let Some(branch) = keyword(input, alternatives) {
                draft.keyword = Some(branch.tag);
                walk(branch.next, input, draft)
            } else {
                reject(operand_name(tag), input.first())
            }
        }
        Node::Topic { next } => {
            if let Some(token) = take(input, Symbol::Word) {
                draft.topic = Some(token.text);
            } else if has_operand(input) {
                return reject("command name", input.first());
            }
            walk(next, input, draft)
        }
    }
}

fn first_keyword(choices: &'static [ChoiceBranch]) -> &'static str {
    choices.first().map_or("keyword", |choice| choice.keyword)
}

const fn operand_name(tag: IntegerTag) -> &'static str {
    match tag {
        IntegerTag::Slot => "slot",
        IntegerTag::Milliamps => "milliamps",
    }
}

/// Operands collected while walking one command.
struct Draft<'a> {
    tag: CommandTag,
    slot: Option<u32>,
    milliamps: Option<u32>,
    keyword: Option<ChoiceTag>,
    topic: Option<&'a str>,
}

impl<'a> Draft<'a> {
    const fn new(tag: CommandTag) -> Self {
        Self {
            tag,
            slot: None,
            milliamps: None,
            keyword: None,
            topic: None,
        }
    }

    fn number(&mut self, tag: IntegerTag, value: u32) {
        match tag {
            IntegerTag::Slot => self.slot = Some(value),
            IntegerTag::Milliamps => self.milliamps = Some(value),
        }
    }

    fn finish(self) -> Step<'a, Command<'a>> {
        let command = match (self.tag, self.keyword) {
            (CommandTag::Store, Some(ChoiceTag::Default)) => Command::Store {
                slot: required(self.slot, "slot")?,
                value: StoreValue::Default,
            },
            (CommandTag::Store, _) => Command::Store {
                slot: required(self.slot, "slot")?,
                value: StoreValue::Milliamps(required(self.milliamps, "milliamps")?),
            },
            (CommandTag::Read, Some(ChoiceTag::All)) => Command::Read(ReadTarget::All),
            (CommandTag::Read, _) => Command::Read(ReadTarget::Slot(required(self.slot, "slot")?)),
            (CommandTag::Calibrate, _) => Command::Calibrate,
            (CommandTag::CompareTest, _) => Command::CompareTest {
                milliamps: required(self.milliamps, "milliamps")?,
            },
            (CommandTag::BackEmf, Some(ChoiceTag::On)) => Command::BackEmf(BackEmfAction::On),
            (CommandTag::BackEmf, Some(ChoiceTag::Off)) => Command::BackEmf(BackEmfAction::Off),
            (CommandTag::BackEmf, Some(ChoiceTag::Check)) => Command::BackEmf(BackEmfAction::Check),
            (CommandTag::BackEmf, _) => return reject("on", None),
            (CommandTag::CurrentSweep, _) => Command::CurrentSweep,
            (CommandTag::Exit, keyword) => Command::Exit {
                diagnostics: keyword == Some(ChoiceTag::Diagnostics),
            },
            (CommandTag::Status, _) => Command::Status,
            (CommandTag::Help, _) => Command::Help { topic: self.topic },
        };
        Ok(command)
    }
}

fn required<'a>(value: Option<u32>, what: &'static str) -> Step<'a, u32> {
    value.ok_or(ErrMode::Backtrack(SyntaxError::Missing(what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_of(line: &str) -> Command<'_> {
        parse(line).expect("line should parse")
    }

    fn syntax_error_of(line: &str) -> SyntaxError<'_> {
        match parse(line) {
            Err(ParseError::Syntax(error)) => error,
            other => panic!("{line:?} gave {other:?}"),
        }
    }

    #[test]
    fn store_takes_a_limit_or_default() {
        assert_eq!(
            command_of("STORE 3 2500"),
            Command::Store {
                slot: 3,
                value: StoreValue::Milliamps(2500)
            }
        );
        assert_eq!(
            command_of("store 3 default\r\n"),
            Command::Store {
                slot: 3,
                value: StoreValue::Default
            }
        );
    }

    #[test]
    fn out_of_range_slots_still_parse() {
        assert_eq!(
            command_of("STORE 11 5000"),
            Command::Store {
                slot: 11,
                value: StoreValue::Milliamps(5000)
            }
        );
    }

    #[test]
    fn read_takes_a_slot_or_all() {
        assert_eq!(command_of("READ 7"), Command::Read(ReadTarget::Slot(7)));
        assert_eq!(command_of("read ALL"), Command::Read(ReadTarget::All));
    }

    #[test]
    fn keywords_ignore_case() {
        assert_eq!(command_of("COMP_TEST 4200"), Command::CompareTest { milliamps: 4200 });
        assert_eq!(command_of("current_sweep"), Command::CurrentSweep);
        assert_eq!(command_of("Back_EMF check"), Command::BackEmf(BackEmfAction::Check));
    }

    #[test]
    fn exit_may_request_diagnostics() {
        assert_eq!(command_of("EXIT"), Command::Exit { diagnostics: false });
        assert_eq!(command_of("EXIT DIAGNOSTICS"), Command::Exit { diagnostics: true });
    }

    #[test]
    fn help_topic_is_optional() {
        assert_eq!(command_of("help"), Command::Help { topic: None });
        assert_eq!(command_of("HELP store"), Command::Help { topic: Some("store") });
        assert!(parse("HELP 5").is_err());
    }

    #[test]
    fn missing_operands_are_named() {
        assert_eq!(syntax_error_of("STORE 3"), SyntaxError::Missing("milliamps"));
        assert_eq!(syntax_error_of("BACK_EMF"), SyntaxError::Missing("on"));
        assert_eq!(syntax_error_of("COMP_TEST\r\n"), SyntaxError::Missing("milliamps"));
        assert_eq!(syntax_error_of("READ"), SyntaxError::Missing("slot"));
    }

    #[test]
    fn unknown_commands_and_trailing_words_fail() {
        assert_eq!(syntax_error_of("REBOOT now"), SyntaxError::UnknownCommand("REBOOT"));
        assert!(matches!(
            syntax_error_of("CALIBRATE now"),
            SyntaxError::Expected { found: "now", .. }
        ));
        assert!(matches!(
            syntax_error_of("BACK_EMF maybe"),
            SyntaxError::Expected { what: "on", found: "maybe", .. }
        ));
    }

    #[test]
    fn stray_characters_are_reported_with_position() {
        assert_eq!(syntax_error_of("STORE 1 $"), SyntaxError::Stray { text: "$", at: 8 });
    }

    #[test]
    fn oversized_numbers_fail() {
        assert_eq!(
            syntax_error_of("COMP_TEST 99999999999"),
            SyntaxError::BadNumber("99999999999")
        );
    }

    #[test]
    fn lexer_keeps_unmatched_tail_as_stray() {
        let tokens = lex("read all?").expect("line should lex");
        let last = tokens.last().expect("at least one token");
        assert_eq!(last.symbol, Symbol::Stray);
        assert_eq!(last.text, "?");
    }

    #[test]
    fn long_lines_overflow_the_token_buffer() {
        let line = "a b c d e f g h i j k l m n o p q";
        assert_eq!(parse(line), Err(ParseError::Scan(ScanError::Overflow)));
    }
}
