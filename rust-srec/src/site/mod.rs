//! Site Strategy Registry (C1): classify a URL by host and derive
//! per-site extractor flags. Pure, no I/O.

use std::time::Duration;

use crate::utils::url::extract_host;

/// The `scheme://host` origin of a URL, suitable for an `Origin` header.
fn origin_of(url: &str) -> Option<String> {
    let scheme = if url.starts_with("https://") {
        "https"
    } else if url.starts_with("http://") {
        "http"
    } else {
        return None;
    };
    extract_host(url).map(|host| format!("{scheme}://{host}"))
}

/// The site a URL is classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteClass {
    Youtube,
    Twitter,
    Missav,
    AdultGeneric,
    Generic,
}

/// A known-adult-site host suffix list. Real deployments extend this from
/// configuration; kept short and explicit here.
const ADULT_HOST_SUFFIXES: &[&str] = &["pornhub.com", "xvideos.com", "xnxx.com"];

impl SiteClass {
    pub fn classify(url: &str) -> Self {
        let Some(host) = extract_host(url) else {
            return Self::Generic;
        };
        let host = host.to_ascii_lowercase();
        if host.contains("youtube.com") || host.contains("youtu.be") {
            Self::Youtube
        } else if host.contains("twitter.com") || host.contains("x.com") {
            Self::Twitter
        } else if host.contains("missav") {
            Self::Missav
        } else if ADULT_HOST_SUFFIXES.iter().any(|s| host.ends_with(s)) {
            Self::AdultGeneric
        } else {
            Self::Generic
        }
    }
}

/// Probing/download stages, in escalation order. Not every site visits every
/// stage -- see [`SiteProfile::stages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Primary,
    YoutubeNoRestrict,
    Hardened,
    Extended,
    ForceV6,
}

/// Timeouts and retry counts applied at the extractor-flag level.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimeouts {
    pub socket: Duration,
    pub retries: u32,
    pub fragment_retries: u32,
    pub retry_sleep: Duration,
}

/// Whether the external download accelerator may be used for this site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorPolicy {
    On,
    Off,
    Auto,
}

/// A derived (never persisted) description of how to talk to a given site.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub class: SiteClass,
    pub accelerator_policy: AcceleratorPolicy,
    pub jitter: Option<(Duration, Duration)>,
    /// Extra identity headers (`name`, `value`) sent on every request to this site.
    pub headers: Vec<(String, String)>,
    /// `scheme://host` origin of the target URL, sent as `Origin` from [`Stage::Extended`] on.
    pub origin: Option<String>,
}

impl SiteProfile {
    pub fn for_url(url: &str) -> Self {
        let class = SiteClass::classify(url);
        let accelerator_policy = match class {
            SiteClass::Youtube | SiteClass::Missav => AcceleratorPolicy::Off,
            _ => AcceleratorPolicy::Auto,
        };
        let jitter = match class {
            SiteClass::Twitter => Some((Duration::from_millis(150), Duration::from_millis(900))),
            _ => None,
        };
        let headers = match class {
            SiteClass::Missav | SiteClass::AdultGeneric => {
                vec![("Referer".to_string(), origin_of(url).unwrap_or_else(|| url.to_string()))]
            }
            _ => vec![],
        };
        Self {
            class,
            accelerator_policy,
            jitter,
            headers,
            origin: origin_of(url),
        }
    }

    /// Ordered probe stages for this site (§4.4).
    pub fn stages(&self) -> Vec<Stage> {
        match self.class {
            SiteClass::Youtube => vec![
                Stage::Primary,
                Stage::YoutubeNoRestrict,
                Stage::Hardened,
                Stage::Extended,
                Stage::ForceV6,
            ],
            SiteClass::Twitter => vec![
                Stage::Primary,
                Stage::Hardened,
                Stage::Extended,
                Stage::ForceV6,
            ],
            _ => vec![Stage::Primary, Stage::Hardened],
        }
    }

    pub fn retry_timeouts(&self, stage: Stage) -> RetryTimeouts {
        match stage {
            Stage::Primary | Stage::YoutubeNoRestrict => RetryTimeouts {
                socket: Duration::from_secs(15),
                retries: 3,
                fragment_retries: 3,
                retry_sleep: Duration::from_secs(1),
            },
            Stage::Hardened => RetryTimeouts {
                socket: Duration::from_secs(20),
                retries: 5,
                fragment_retries: 6,
                retry_sleep: Duration::from_secs(2),
            },
            Stage::Extended | Stage::ForceV6 => RetryTimeouts {
                socket: Duration::from_secs(30),
                retries: 8,
                fragment_retries: 10,
                retry_sleep: Duration::from_secs(3),
            },
        }
    }

    /// Extractor CLI flags for a given stage, composed from base + identity +
    /// transport + anti-bot flag groups (§4.1).
    pub fn extractor_flags(
        &self,
        stage: Stage,
        disable_accelerator: bool,
        cookie_flags: &[String],
    ) -> Vec<String> {
        let timeouts = self.retry_timeouts(stage);
        let mut flags = vec![
            "--no-warnings".to_string(),
            "--no-check-certificate".to_string(),
            "--socket-timeout".to_string(),
            timeouts.socket.as_secs().to_string(),
            "--retries".to_string(),
            timeouts.retries.to_string(),
            "--fragment-retries".to_string(),
            timeouts.fragment_retries.to_string(),
            "--retry-sleep".to_string(),
            timeouts.retry_sleep.as_secs().to_string(),
        ];

        if self.class == SiteClass::Youtube && stage == Stage::Primary {
            flags.push("--no-playlist".to_string());
        }

        for (name, value) in &self.headers {
            flags.push("--add-header".to_string());
            flags.push(format!("{name}:{value}"));
        }

        match stage {
            Stage::Extended => {
                flags.push("--add-header".to_string());
                flags.push("Accept:*/*".to_string());
                if let Some(origin) = &self.origin {
                    flags.push("--add-header".to_string());
                    flags.push(format!("Origin:{origin}"));
                }
            }
            Stage::ForceV6 => {
                flags.push("--force-ipv6".to_string());
            }
            Stage::Hardened => {
                flags.push("--ignore-errors".to_string());
                flags.push("--force-ipv4".to_string());
            }
            _ => {}
        }

        if self.class == SiteClass::Missav {
            flags.push("--extractor-args".to_string());
            flags.push("generic:impersonate=chrome".to_string());
        }

        let accelerator_allowed = !disable_accelerator
            && match self.accelerator_policy {
                AcceleratorPolicy::On | AcceleratorPolicy::Auto => true,
                AcceleratorPolicy::Off => false,
            };
        if accelerator_allowed {
            flags.push("--downloader".to_string());
            flags.push("aria2c".to_string());
        }

        flags.extend_from_slice(cookie_flags);

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_youtube() {
        assert_eq!(
            SiteClass::classify("https://www.youtube.com/watch?v=abc"),
            SiteClass::Youtube
        );
        assert_eq!(
            SiteClass::classify("https://youtu.be/abc"),
            SiteClass::Youtube
        );
    }

    #[test]
    fn classifies_twitter_and_x() {
        assert_eq!(
            SiteClass::classify("https://twitter.com/user/status/1"),
            SiteClass::Twitter
        );
        assert_eq!(
            SiteClass::classify("https://x.com/user/status/1"),
            SiteClass::Twitter
        );
    }

    #[test]
    fn classifies_generic_fallback() {
        assert_eq!(
            SiteClass::classify("https://example.com/video"),
            SiteClass::Generic
        );
    }

    #[test]
    fn youtube_forbids_accelerator() {
        let profile = SiteProfile::for_url("https://www.youtube.com/watch?v=abc");
        assert_eq!(profile.accelerator_policy, AcceleratorPolicy::Off);
        let flags = profile.extractor_flags(Stage::Primary, false, &[]);
        assert!(!flags.contains(&"aria2c".to_string()));
    }

    #[test]
    fn youtube_primary_stage_disables_playlist_expansion() {
        let profile = SiteProfile::for_url("https://www.youtube.com/watch?v=abc");
        let flags = profile.extractor_flags(Stage::Primary, false, &[]);
        assert!(flags.contains(&"--no-playlist".to_string()));
    }

    #[test]
    fn twitter_has_jitter_hint() {
        let profile = SiteProfile::for_url("https://twitter.com/user/status/1");
        assert!(profile.jitter.is_some());
    }

    #[test]
    fn disable_accelerator_flag_overrides_site_policy() {
        let profile = SiteProfile::for_url("https://example.com/video");
        let flags = profile.extractor_flags(Stage::Primary, true, &[]);
        assert!(!flags.contains(&"aria2c".to_string()));
    }

    #[test]
    fn extended_stage_adds_origin_header() {
        let profile = SiteProfile::for_url("https://www.youtube.com/watch?v=abc");
        assert_eq!(profile.origin.as_deref(), Some("https://www.youtube.com"));
        let flags = profile.extractor_flags(Stage::Extended, false, &[]);
        assert!(flags.contains(&"Origin:https://www.youtube.com".to_string()));
        assert!(flags.contains(&"Accept:*/*".to_string()));
    }

    #[test]
    fn adult_generic_site_carries_referer_header() {
        let profile = SiteProfile::for_url("https://www.pornhub.com/view_video?id=1");
        assert_eq!(profile.headers, vec![("Referer".to_string(), "https://www.pornhub.com".to_string())]);
        let flags = profile.extractor_flags(Stage::Primary, false, &[]);
        assert!(flags.contains(&"Referer:https://www.pornhub.com".to_string()));
    }

    #[test]
    fn extractor_flags_appends_cookie_flags() {
        let profile = SiteProfile::for_url("https://example.com/video");
        let cookies = vec!["--cookies".to_string(), "/tmp/c.txt".to_string()];
        let flags = profile.extractor_flags(Stage::Primary, false, &cookies);
        assert!(flags.ends_with(&cookies[..]));
    }
}
