//! Kernel command line parser

/// Zero-copy command line parser.
///
/// The command line is a whitespace separated list of flags (`debug`) and key value pairs
/// (`mode=userland`). Keys and values may be quoted to include whitespace or equal signs.
#[derive(Debug, Clone)]
pub struct CmdLine<'a> {
    rest: &'a str,
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CmdLineToken<'a> {
    Flag(&'a str),
    KeyValuePair(&'a str, &'a str),
}

impl<'a> CmdLineToken<'a> {
    pub fn key(&self) -> &'a str {
        match *self {
            CmdLineToken::Flag(key) => key,
            CmdLineToken::KeyValuePair(key, _) => key,
        }
    }
}

impl<'a> CmdLine<'a> {
    pub fn parse(raw: &'a str) -> CmdLine<'a> {
        CmdLine { rest: raw }
    }

    /// Whether the flag `name` appears anywhere on the command line.
    pub fn has_flag(&self, name: &str) -> bool {
        self.clone().any(|t| t == CmdLineToken::Flag(name))
    }

    /// Value of the last `key=value` pair for `key`.
    pub fn value(&self, key: &str) -> Option<&'a str> {
        self.clone()
            .filter_map(|t| match t {
                CmdLineToken::KeyValuePair(k, v) if k == key => Some(v),
                _ => None,
            })
            .last()
    }

    /// Split off the next symbol. Inside quotes everything up to the closing quote belongs to
    /// the symbol, outside of quotes it ends at whitespace or, for keys, at an equal sign.
    fn symbol(&mut self, is_key: bool) -> &'a str {
        if let Some(quoted) = self.rest.strip_prefix('"') {
            let (symbol, rest) = match quoted.find('"') {
                Some(close) => (&quoted[..close], &quoted[close + 1..]),
                None => (quoted, ""),
            };
            self.rest = rest;
            symbol
        } else {
            let end = self
                .rest
                .char_indices()
                .find(|&(_, c)| c.is_whitespace() || (is_key && c == '='))
                .map_or(self.rest.len(), |(i, _)| i);
            let (symbol, rest) = self.rest.split_at(end);
            self.rest = rest;
            symbol
        }
    }
}

impl<'a> Iterator for CmdLine<'a> {
    type Item = CmdLineToken<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let key = self.symbol(true);
        match self.rest.strip_prefix('=') {
            Some(after_equals) => {
                self.rest = after_equals;
                let value = self.symbol(false);
                Some(CmdLineToken::KeyValuePair(key, value))
            }
            None => Some(CmdLineToken::Flag(key)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::vec::Vec;

    fn tokens(input: &str) -> Vec<CmdLineToken> {
        CmdLine::parse(input).collect()
    }

    #[test]
    fn flags_and_pairs() {
        assert_eq!(
            tokens("  debug mode=userland   crashprompt "),
            vec![
                CmdLineToken::Flag("debug"),
                CmdLineToken::KeyValuePair("mode", "userland"),
                CmdLineToken::Flag("crashprompt"),
            ]
        );
        assert_eq!(tokens(""), vec![]);
        assert_eq!(tokens("   "), vec![]);
    }

    #[test]
    fn quoting() {
        assert_eq!(tokens("\"a b\"=c"), vec![CmdLineToken::KeyValuePair("a b", "c")]);
        assert_eq!(tokens("k=\"x y=z\" f"), vec![CmdLineToken::KeyValuePair("k", "x y=z"), CmdLineToken::Flag("f")]);
        assert_eq!(tokens("k=a=b"), vec![CmdLineToken::KeyValuePair("k", "a=b")]);
        assert_eq!(tokens("\"unterminated"), vec![CmdLineToken::Flag("unterminated")]);
        assert_eq!(tokens("empty="), vec![CmdLineToken::KeyValuePair("empty", "")]);
    }

    #[test]
    fn lookups() {
        let c = CmdLine::parse("mode=kernel debug mode=userland");
        assert!(c.has_flag("debug"));
        assert!(!c.has_flag("mode"));
        assert_eq!(c.value("mode"), Some("userland"));
        assert_eq!(c.value("modules"), None);
        assert_eq!(CmdLineToken::KeyValuePair("mode", "x").key(), "mode");
    }
}
