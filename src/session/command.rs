//! Control-channel command parsing (spec.md §4.2).
//!
//! One line in, one [`Command`] out. Parsing never fails: an unrecognized
//! verb becomes [`Command::Unknown`] so the dispatcher can reply `502`
//! without a separate error path.

/// A parsed control-channel command line: verb plus raw remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub arg: String,
}

impl Command {
    /// Splits `line` (already stripped of its trailing CRLF) on the first
    /// run of whitespace. The verb is upper-cased for matching; the
    /// argument is passed through byte-for-byte since paths are
    /// case-sensitive and HASH/MFMT arguments carry embedded spaces.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        match line.find(char::is_whitespace) {
            Some(idx) => {
                let (verb, rest) = line.split_at(idx);
                Command { verb: verb.to_ascii_uppercase(), arg: rest.trim_start().to_string() }
            }
            None => Command { verb: line.to_ascii_uppercase(), arg: String::new() },
        }
    }

    /// `true` for the small set of commands accepted before login
    /// completes (spec.md §4.2 dispatch table "Gate" column).
    pub fn allowed_before_login(verb: &str) -> bool {
        matches!(verb, "USER" | "PASS" | "QUIT" | "HOST" | "AUTH" | "FEAT" | "NOOP" | "HELP" | "SYST" | "ACCT" | "PBSZ" | "PROT" | "OPTS")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verb_and_arg() {
        let cmd = Command::parse("RETR /pub/file.txt");
        assert_eq!(cmd.verb, "RETR");
        assert_eq!(cmd.arg, "/pub/file.txt");
    }

    #[test]
    fn verb_only_has_empty_arg() {
        let cmd = Command::parse("PWD");
        assert_eq!(cmd.verb, "PWD");
        assert_eq!(cmd.arg, "");
    }

    #[test]
    fn verb_is_case_insensitive() {
        let cmd = Command::parse("retr foo");
        assert_eq!(cmd.verb, "RETR");
    }

    #[test]
    fn collapses_verb_argument_whitespace_gap() {
        let cmd = Command::parse("MDTM   /a/b");
        assert_eq!(cmd.verb, "MDTM");
        assert_eq!(cmd.arg, "/a/b");
    }
}
