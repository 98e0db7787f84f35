//! robots.txt crawl gate
//!
//! Answers "may this agent fetch this URL" for a single site. URLs on other
//! authorities are always allowed; they are not this gate's concern.

use super::url_authority;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
    /// Any Allow/Disallow line seen, including an empty one
    saw_rule: bool,
}

/// Parsed robots.txt for one site and one user agent
#[derive(Debug, Clone)]
pub struct RobotsGate {
    authority: Option<String>,
    /// Product token of the user agent, lowercased (`SitewatchBot/1.0` -> `sitewatchbot`)
    agent_token: String,
    /// Rules of the group that applies to us; `None` until loaded
    rules: Option<Vec<Rule>>,
    sitemaps: Vec<String>,
}

impl RobotsGate {
    /// Create an unloaded gate, which allows everything
    pub fn new(base_url: &str, user_agent: &str) -> Self {
        let agent_token = user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();

        Self {
            authority: url_authority(base_url),
            agent_token,
            rules: None,
            sitemaps: Vec::new(),
        }
    }

    /// Parse robots.txt content, replacing anything loaded before
    pub fn load(&mut self, robots_txt: &str) {
        let (groups, sitemaps) = parse_groups(robots_txt);

        let specific: Vec<&Group> = groups
            .iter()
            .filter(|g| g.agents.iter().any(|a| self.agent_matches(a)))
            .collect();
        let selected: Vec<&Group> = if specific.is_empty() {
            groups.iter().filter(|g| g.agents.iter().any(|a| a == "*")).collect()
        } else {
            specific
        };

        self.rules = Some(
            selected
                .into_iter()
                .flat_map(|g| g.rules.iter().cloned())
                .collect(),
        );
        self.sitemaps = sitemaps;
    }

    pub fn is_loaded(&self) -> bool {
        self.rules.is_some()
    }

    /// `Sitemap:` directives, in file order
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Check whether `url` may be fetched
    pub fn can_fetch(&self, url: &str) -> bool {
        let Some(rules) = &self.rules else {
            return true;
        };
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        if url_authority(url) != self.authority {
            return true;
        }

        let mut target = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut longest_allow: Option<usize> = None;
        let mut longest_disallow: Option<usize> = None;
        for rule in rules {
            if !path_matches(&target, &rule.pattern) {
                continue;
            }
            let slot = if rule.allow {
                &mut longest_allow
            } else {
                &mut longest_disallow
            };
            let len = rule.pattern.len();
            *slot = Some(match *slot {
                Some(current) => current.max(len),
                None => len,
            });
        }

        // Longer match wins; if equal, allow wins
        match (longest_allow, longest_disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    /// Keep only fetchable URLs, preserving order
    pub fn filter_urls<I, S>(&self, urls: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .filter(|u| self.can_fetch(u.as_ref()))
            .map(|u| u.as_ref().to_string())
            .collect()
    }

    fn agent_matches(&self, agent: &str) -> bool {
        agent != "*" && !agent.is_empty() && self.agent_token.contains(agent)
    }
}

fn parse_groups(content: &str) -> (Vec<Group>, Vec<String>) {
    let mut groups: Vec<Group> = Vec::new();
    let mut sitemaps = Vec::new();
    let mut current: Option<Group> = None;

    for raw in content.lines() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let directive = directive.trim().to_ascii_lowercase();
        let value = value.trim();

        match directive.as_str() {
            "user-agent" => {
                // Consecutive User-agent lines share one group
                let starts_new = current.as_ref().map_or(true, |g| g.saw_rule);
                if starts_new {
                    if let Some(done) = current.take() {
                        groups.push(done);
                    }
                    current = Some(Group::default());
                }
                if let Some(group) = current.as_mut() {
                    group.agents.push(value.to_ascii_lowercase());
                }
            }
            "allow" | "disallow" => {
                let Some(group) = current.as_mut() else {
                    continue;
                };
                group.saw_rule = true;
                // An empty Disallow allows everything, so it adds no rule
                if value.is_empty() {
                    continue;
                }
                group.rules.push(Rule {
                    allow: directive == "allow",
                    pattern: value.to_string(),
                });
            }
            "sitemap" => {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    if let Some(done) = current {
        groups.push(done);
    }
    (groups, sitemaps)
}

/// Match a robots.txt pattern (`*` wildcard, `$` end anchor) against a path
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let path = path.as_bytes();
    let pat = pattern.as_bytes();
    let (mut p, mut s) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    loop {
        if p < pat.len() && pat[p] == b'*' {
            star = Some((p, s));
            p += 1;
            continue;
        }
        if p == pat.len() {
            if !anchored || s == path.len() {
                return true;
            }
        } else if s < path.len() && pat[p] == path[s] {
            p += 1;
            s += 1;
            continue;
        }
        match star {
            Some((star_p, star_s)) if star_s < path.len() => {
                star = Some((star_p, star_s + 1));
                p = star_p + 1;
                s = star_s + 1;
            }
            _ => return false,
        }
    }
}
