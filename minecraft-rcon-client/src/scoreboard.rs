//! Parsers for the text the server sends back for scoreboard and player list commands.
//!
//! Server output changed between Minecraft versions, so each parser understands the modern
//! (1.13+) wording as well as the older one. Numbers may contain locale thousands separators.

/// Command that lists every entity tracked by the scoreboard.
pub const LIST_PLAYERS_COMMAND: &str = "scoreboard players list";

/// Command that lists the players currently online.
pub const PLAYER_COUNT_COMMAND: &str = "list";

const SEPARATORS: [char; 5] = [',', '.', '_', ' ', '\u{a0}'];

// Any of these means the server understood the request and simply has no scores to report.
const NO_SCORE_MARKERS: [&str; 3] = ["has no scores", "scores:", "tracked objective"];

/// The value of one scoreboard objective for one player.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Score {
    pub name: String,
    pub value: i64,
}

impl Score {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Score {
            name: name.into(),
            value,
        }
    }
}

/// The command listing the scores of `player`.
pub fn scores_command(player: &str) -> crate::Result<String> {
    let player = player.trim();
    if player.is_empty() {
        // Without a name the server lists every tracked entity instead
        return Err(crate::Error::InvalidCommand("player name is empty"));
    }
    Ok(format!("{} {}", LIST_PLAYERS_COMMAND, player))
}

/// Parse the response to `scoreboard players list`.
///
/// ```
/// use minecraft_rcon_client::parse_player_list;
///
/// let players = parse_player_list("There are 3 tracked players: Alice, Bob, Carol").unwrap();
/// assert_eq!(players, ["Alice", "Bob", "Carol"]);
/// ```
pub fn parse_player_list(raw: &str) -> crate::Result<Vec<String>> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let (preamble, names) = match text.split_once(':') {
        Some((preamble, names)) => (preamble, Some(names)),
        None => (text, None),
    };

    if !starts_with_ignore_case(preamble, "There are") && !starts_with_ignore_case(preamble, "Showing")
    {
        return Err(crate::Error::UnexpectedFormat(text.to_string()));
    }

    // "There are no tracked entities"
    let names = match names {
        Some(names) => names,
        None => return Ok(Vec::new()),
    };

    let mut players = split_names(names.split(','));

    // 1.12 and older join the last two names: "Showing 3 player(s) on the scoreboard: A, B and C"
    if preamble.contains("on the scoreboard") {
        if let Some(last) = players.pop() {
            players.extend(split_names(last.split(" and ")));
        }
    }

    Ok(players)
}

fn split_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    names
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Parse the response to `list`.
///
/// Accepts `There are 3 of a max of 20 players online: ...`, `There are 3/20 players online:`
/// and `There are no players online`.
pub fn parse_player_count(raw: &str) -> crate::Result<usize> {
    let unexpected = || crate::Error::UnexpectedFormat(raw.trim().to_string());

    let text = raw.trim_start();
    if !starts_with_ignore_case(text, "There are") {
        return Err(unexpected());
    }

    let rest = text["There are".len()..].trim_start();
    if starts_with_ignore_case(rest, "no ") {
        return Ok(0);
    }

    let (count, _) = take_number(rest).ok_or_else(unexpected)?;
    usize::try_from(count).map_err(|_| unexpected())
}

/// Parse the response to `scoreboard players list <player>`.
///
/// Entries may be on separate lines or run together, as servers differ in whether they put
/// line breaks between messages. Recognised entries:
///
/// - `Alice has 42 [money]`
/// - `Alice has no score recorded for [money]`, which reports a value of 0
/// - `[money]: 42`, following a `Alice has 2 scores:` header
/// - `- money: 42 (Money)` from 1.12 and older, named by the display name in parentheses
///
/// Anything else is skipped. A non-empty response without a single entry or a recognisable
/// "no scores" message is an [`UnexpectedFormat`](crate::Error::UnexpectedFormat) error.
///
/// ```
/// use minecraft_rcon_client::{parse_scores, Score};
///
/// let scores = parse_scores("Alice has 2 scores:\n[money]: 1,234\n[deaths]: 3").unwrap();
/// assert_eq!(scores, [Score::new("money", 1234), Score::new("deaths", 3)]);
/// ```
pub fn parse_scores(raw: &str) -> crate::Result<Vec<Score>> {
    let mut scores = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = raw[cursor..].find(|c: char| c == '[' || c == '(') {
        let open = cursor + offset;
        let close_char = if raw[open..].starts_with('[') { ']' } else { ')' };
        let close = match raw[open + 1..].find(close_char) {
            Some(len) => open + 1 + len,
            None => break,
        };

        let name = raw[open + 1..close].trim();
        let prefix = current_line(&raw[cursor..open]);
        let after = &raw[close + 1..];

        let entry = if close_char == ']' {
            bracket_entry(name, prefix, after)
        } else {
            paren_entry(name, prefix).map(|score| (score, 0))
        };

        match entry {
            Some((score, consumed)) => {
                scores.push(score);
                cursor = close + 1 + consumed;
            }
            None => cursor = open + 1,
        }
    }

    if scores.is_empty() && !raw.trim().is_empty() {
        let lower = raw.to_lowercase();
        if !NO_SCORE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Err(crate::Error::UnexpectedFormat(raw.trim().to_string()));
        }
    }

    Ok(scores)
}

/// An entry around `[name]`. Returns the score and how many bytes after the `]` it used.
fn bracket_entry(name: &str, prefix: &str, after: &str) -> Option<(Score, usize)> {
    if name.is_empty() {
        return None;
    }

    // "[money]: 42"
    if let Some(rest) = after.trim_start_matches(is_blank).strip_prefix(':') {
        if let Some((value, len)) = take_number(rest) {
            let consumed = after.len() - rest.len() + len;
            return Some((Score::new(name, value), consumed));
        }
    }

    let prefix = prefix.trim_end();

    // "Alice has no score recorded for [money]"
    if ends_with_ignore_case(prefix, "no score recorded for") {
        return Some((Score::new(name, 0), 0));
    }

    // "Alice has 42 [money]"
    let (head, value) = trailing_number(prefix)?;
    if !ends_with_word(head, "has") {
        return None;
    }
    Some((Score::new(name, value), 0))
}

/// A legacy entry ending in `(name)`: `- money: 42 (Money)`.
fn paren_entry(name: &str, prefix: &str) -> Option<Score> {
    if name.is_empty() {
        return None;
    }

    let (head, value) = trailing_number(prefix.trim_end())?;
    if !head.ends_with(':') {
        return None;
    }
    Some(Score::new(name, value))
}

/// Parse a number that may carry a sign and thousands separators.
pub(crate) fn parse_number(token: &str) -> Option<i64> {
    let token = token.trim_matches(|c: char| c.is_whitespace());
    let (negative, digits) = match token.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, token),
    };

    let digits: String = digits.chars().filter(|c| !SEPARATORS.contains(c)).collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Read a number at the start of `text`, after optional blanks. Returns the value and the number
/// of bytes read.
fn take_number(text: &str) -> Option<(i64, usize)> {
    let start = text.len() - text.trim_start_matches(is_blank).len();
    let signed = &text[start..];
    let unsigned = signed.strip_prefix('-').unwrap_or(signed);
    let sign_len = signed.len() - unsigned.len();

    let mut end = 0;
    let mut chars = unsigned.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if c.is_ascii_digit() {
            end = index + 1;
        } else if end > 0
            && SEPARATORS.contains(&c)
            && chars.peek().map_or(false, |(_, next)| next.is_ascii_digit())
        {
            continue;
        } else {
            break;
        }
    }

    if end == 0 {
        return None;
    }

    let value = parse_number(&signed[..sign_len + end])?;
    Some((value, start + sign_len + end))
}

/// Split a number off the end of `text`, returning the text before it (trimmed) and its value.
fn trailing_number(text: &str) -> Option<(&str, i64)> {
    let start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '-' || SEPARATORS.contains(c))
        .last()
        .map(|(index, _)| index)?;

    let (head, number) = text.split_at(start);
    let value = parse_number(number)?;
    Some((head.trim_end(), value))
}

fn current_line(text: &str) -> &str {
    match text.rfind('\n') {
        Some(index) => &text[index + 1..],
        None => text,
    }
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .map_or(false, |start| start.eq_ignore_ascii_case(prefix))
}

fn ends_with_ignore_case(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text
            .get(text.len() - suffix.len()..)
            .map_or(false, |end| end.eq_ignore_ascii_case(suffix))
}

fn ends_with_word(text: &str, word: &str) -> bool {
    if !ends_with_ignore_case(text, word) {
        return false;
    }
    text[..text.len() - word.len()]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_list_with_names() {
        assert_eq!(
            parse_player_list("There are 2 tracked players: A, B").unwrap(),
            ["A", "B"]
        );
        assert_eq!(
            parse_player_list("There are 3 tracked entities: Alice, Bob, Carol\n").unwrap(),
            ["Alice", "Bob", "Carol"]
        );
    }

    #[test]
    fn player_list_without_players() {
        assert!(parse_player_list("There are 0 tracked players:").unwrap().is_empty());
        assert!(parse_player_list("There are no tracked entities").unwrap().is_empty());
        assert!(parse_player_list("").unwrap().is_empty());
        assert!(parse_player_list("  \n").unwrap().is_empty());
    }

    #[test]
    fn legacy_player_list() {
        assert_eq!(
            parse_player_list("Showing 3 player(s) on the scoreboard:Alice, Bob and Carol").unwrap(),
            ["Alice", "Bob", "Carol"]
        );
        assert_eq!(
            parse_player_list("Showing 1 player(s) on the scoreboard:Alice").unwrap(),
            ["Alice"]
        );
    }

    #[test]
    fn player_list_rejects_unrelated_text() {
        assert!(matches!(
            parse_player_list("Unknown or incomplete command, see below for error"),
            Err(crate::Error::UnexpectedFormat(_))
        ));
        assert!(matches!(
            parse_player_list("Unknown request 2: scoreboard"),
            Err(crate::Error::UnexpectedFormat(_))
        ));
    }

    #[test]
    fn player_count() {
        assert_eq!(
            parse_player_count("There are 3 of a max of 20 players online: A, B, C").unwrap(),
            3
        );
        assert_eq!(parse_player_count("There are 12/20 players online:").unwrap(), 12);
        assert_eq!(
            parse_player_count("There are 1,024 out of maximum 2,000 players online.").unwrap(),
            1024
        );
        assert_eq!(parse_player_count("There are no players online").unwrap(), 0);
        assert!(matches!(
            parse_player_count("Unknown command"),
            Err(crate::Error::UnexpectedFormat(_))
        ));
    }

    #[test]
    fn scores_in_has_form() {
        assert_eq!(
            parse_scores("A has 1,234 [gold]\nA has no score recorded for [xp]").unwrap(),
            [Score::new("gold", 1234), Score::new("xp", 0)]
        );
        assert_eq!(
            parse_scores("Alice has 1.000.000 [money]\r\nAlice has -3 [karma]").unwrap(),
            [Score::new("money", 1_000_000), Score::new("karma", -3)]
        );
    }

    #[test]
    fn modern_scores() {
        assert_eq!(
            parse_scores("Alice has 2 scores:\n[money]: 42\n[deaths]: 7").unwrap(),
            [Score::new("money", 42), Score::new("deaths", 7)]
        );
        // Messages run together on servers that do not separate them
        assert_eq!(
            parse_scores("Alice has 2 scores:[money]: 1 234[deaths]: -7").unwrap(),
            [Score::new("money", 1234), Score::new("deaths", -7)]
        );
    }

    #[test]
    fn legacy_scores() {
        assert_eq!(
            parse_scores("Showing 2 tracked objective(s) for Alice:- money: 42 (Money)- xp: 7 (XP)")
                .unwrap(),
            [Score::new("Money", 42), Score::new("XP", 7)]
        );
    }

    #[test]
    fn duplicate_names_are_kept() {
        assert_eq!(
            parse_scores("[kills]: 1\n[kills]: 2").unwrap(),
            [Score::new("kills", 1), Score::new("kills", 2)]
        );
    }

    #[test]
    fn skips_informational_lines() {
        assert_eq!(
            parse_scores("\nA has 5 [gold]\nsome unrelated line\n\nA has 6 [iron]\n").unwrap(),
            [Score::new("gold", 5), Score::new("iron", 6)]
        );
    }

    #[test]
    fn no_scores() {
        assert!(parse_scores("Alice has no scores").unwrap().is_empty());
        assert!(parse_scores("Player Alice has no scores recorded").unwrap().is_empty());
        assert!(parse_scores("").unwrap().is_empty());
    }

    #[test]
    fn unparseable_scores() {
        assert!(matches!(
            parse_scores("Unknown or incomplete command"),
            Err(crate::Error::UnexpectedFormat(_))
        ));
    }

    #[test]
    fn numbers_with_separators() {
        assert_eq!(parse_number("1,234"), Some(1234));
        assert_eq!(parse_number("1.234.567"), Some(1_234_567));
        assert_eq!(parse_number("-12 000"), Some(-12_000));
        assert_eq!(parse_number("12a"), None);
        assert_eq!(parse_number("-"), None);
    }

    #[test]
    fn scores_command_needs_a_player() {
        assert_eq!(scores_command("Alice").unwrap(), "scoreboard players list Alice");
        assert!(matches!(
            scores_command(" "),
            Err(crate::Error::InvalidCommand(_))
        ));
    }
}
