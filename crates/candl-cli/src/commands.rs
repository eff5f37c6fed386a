use candl_orchestrator::Theme;

/// One line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Analyze(String),
    Search(String),
    WatchAdd(String),
    WatchRemove(String),
    Watchlist,
    News,
    Theme(Theme),
    Tips(bool),
    Clear { purge: bool },
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        let command = match head.to_lowercase().as_str() {
            "analyze" | "a" => Command::Analyze(required(rest, "analyze <SYMBOL>")?),
            "search" | "s" => Command::Search(rest.to_string()),
            "watch" | "w" => {
                let (action, symbol) = rest
                    .split_once(char::is_whitespace)
                    .map(|(a, s)| (a, s.trim()))
                    .unwrap_or((rest, ""));
                match action {
                    "add" => Command::WatchAdd(required(symbol, "watch add <SYMBOL>")?),
                    "rm" | "remove" => Command::WatchRemove(required(symbol, "watch rm <SYMBOL>")?),
                    _ => return Err("usage: watch add|rm <SYMBOL>".to_string()),
                }
            }
            "watchlist" | "wl" => Command::Watchlist,
            "news" => Command::News,
            "theme" => Command::Theme(rest.parse()?),
            "tips" => match rest {
                "on" | "show" => Command::Tips(true),
                "off" | "hide" => Command::Tips(false),
                _ => return Err("usage: tips on|off".to_string()),
            },
            "clear" => match rest {
                "" => Command::Clear { purge: false },
                "--purge" => Command::Clear { purge: true },
                _ => return Err("usage: clear [--purge]".to_string()),
            },
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            // A bare ticker is shorthand for analyze.
            _ if rest.is_empty() => Command::Analyze(head.to_string()),
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };

        Ok(Some(command))
    }
}

fn required(arg: &str, usage: &str) -> Result<String, String> {
    if arg.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(arg.to_string())
    }
}

pub const HELP: &str = "\
commands:
  analyze <SYM>      fetch and show a snapshot (a bare ticker works too)
  search <text>      symbol suggestions
  watch add|rm <SYM> edit the watchlist
  watchlist          show the watchlist
  news               general market headlines
  theme dark|light   set the theme preference
  tips on|off        show or hide tips
  clear [--purge]    stop refresh/retry and drop the display (--purge also drops the cache entry)
  quit";
