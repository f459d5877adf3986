//! The `iptables-save` rule model and the embedded DNS redirect rewrite.
//!
//! Docker redirects `127.0.0.11:53` to its embedded resolver with NAT rules
//! that only match traffic from the node itself. Rewritten to the engine
//! host's address, the same rules also serve pods.

use std::fmt;
use std::net::Ipv4Addr;

use nodeboot_common::constants::DOCKER_EMBEDDED_DNS;
use nodeboot_common::error::Result;

use crate::command::Invocation;
use crate::host::Host;

/// An appended rule, `-A <chain> <args...>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Chain the rule is appended to.
    pub chain: String,
    /// Match and target arguments, quoted values kept intact.
    pub args: Vec<String>,
}

impl Rule {
    fn value_after(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }

    fn jumps_to(&self, target: &str) -> bool {
        self.value_after("-j") == Some(target)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-A {}", self.chain)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Rule(Rule),
    /// Table headers, chain declarations, `COMMIT` and comments.
    Verbatim(String),
}

/// A full `iptables-save` dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    lines: Vec<Line>,
}

impl RuleSet {
    /// Parses `iptables-save` output. Lines that are not `-A` rules are kept
    /// verbatim.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|line| {
                let mut tokens = tokenize(line).into_iter();
                match (tokens.next().as_deref(), tokens.next()) {
                    (Some("-A"), Some(chain)) => Line::Rule(Rule {
                        chain,
                        args: tokens.collect(),
                    }),
                    _ => Line::Verbatim(line.to_string()),
                }
            })
            .collect();
        Self { lines }
    }

    /// All rules in dump order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.lines.iter().filter_map(|line| match line {
            Line::Rule(rule) => Some(rule),
            Line::Verbatim(_) => None,
        })
    }

    /// Points the embedded DNS rules at `host`. Returns whether anything
    /// changed.
    ///
    /// * `-d 127.0.0.11` matches become `-d <host>`.
    /// * `--to-source :53` becomes `--to-source <host>:53`.
    /// * DNAT rules to the embedded resolver that lack `--dport` get
    ///   `--dport 53`; some nft builds drop it from the dump.
    /// * Every `OUTPUT` jump to `DOCKER_OUTPUT` is mirrored on `PREROUTING`.
    pub fn redirect_dns(&mut self, host: Ipv4Addr) -> bool {
        let before = self.clone();
        let mut out = Vec::with_capacity(self.lines.len());
        for line in std::mem::take(&mut self.lines) {
            let Line::Rule(mut rule) = line else {
                out.push(line);
                continue;
            };
            rewrite_rule(&mut rule, host);
            let mirror = (rule.chain == "OUTPUT" && rule.jumps_to("DOCKER_OUTPUT")).then(|| Rule {
                chain: "PREROUTING".into(),
                args: rule.args.clone(),
            });
            out.push(Line::Rule(rule));
            if let Some(mirror) = mirror {
                let present = before.rules().any(|r| *r == mirror);
                if !present {
                    out.push(Line::Rule(mirror));
                }
            }
        }
        self.lines = out;
        *self != before
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                Line::Rule(rule) => writeln!(f, "{rule}")?,
                Line::Verbatim(text) => writeln!(f, "{text}")?,
            }
        }
        Ok(())
    }
}

fn rewrite_rule(rule: &mut Rule, host: Ipv4Addr) {
    for i in 1..rule.args.len() {
        let (flag, value) = (rule.args[i - 1].as_str(), rule.args[i].as_str());
        let replacement = match flag {
            "-d" => value
                .strip_prefix(DOCKER_EMBEDDED_DNS)
                .filter(|suffix| suffix.is_empty() || suffix.starts_with('/'))
                .map(|suffix| format!("{host}{suffix}")),
            "--to-source" if value == ":53" => Some(format!("{host}:53")),
            _ => None,
        };
        if let Some(replacement) = replacement {
            rule.args[i] = replacement;
        }
    }

    let to_embedded = rule
        .value_after("--to-destination")
        .is_some_and(|d| d.starts_with(DOCKER_EMBEDDED_DNS));
    if !rule.jumps_to("DNAT") || !to_embedded || rule.args.iter().any(|a| a == "--dport") {
        return;
    }
    let Some(jump) = rule.args.iter().position(|a| a == "-j") else {
        return;
    };
    if jump >= 2 && rule.args[jump - 2] == "-p" {
        let _ = rule
            .args
            .splice(jump..jump, ["--dport".to_string(), "53".to_string()]);
    }
}

/// Splits a rule line on whitespace, keeping double-quoted values whole.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Dumps the live rules, rewrites the DNS redirect and restores them.
///
/// Nothing is restored when the dump has no embedded DNS rules.
///
/// # Errors
///
/// Returns an error if `iptables-save` or `iptables-restore` fails.
pub fn reconcile(host: &Host<'_>, target: Ipv4Addr) -> Result<()> {
    let dump = host.runner.run_checked(&Invocation::new("iptables-save"))?;
    let mut rules = RuleSet::parse(&dump);
    if !rules.redirect_dns(target) {
        tracing::debug!("no embedded DNS rules to rewrite");
        return Ok(());
    }
    tracing::info!(host = %target, "redirecting embedded DNS rules");
    let restore = Invocation::new("iptables-restore").stdin(rules.to_string());
    let _ = host.runner.run_checked(&restore)?;
    Ok(())
}
