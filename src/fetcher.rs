use crate::config::FetchOptions;
use anyhow::{bail, Context, Result};
use headless_chrome::{Browser, LaunchOptions};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use std::ffi::OsStr;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENTS: [&str; 8] = [
    "Chilkat/1.0.0 (+http://www.chilkatsoft.com/ChilkatHttpUA.asp)",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 9_0 like Mac OS X) AppleWebKit/601.1.46 (KHTML, like Gecko) Version/9.0 Mobile/13A342 Safari/601.1",
    "Mozilla/5.0 (Windows NT 5.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/46.0.2490.86 Safari/537.36",
    "Mozilla/5.0 (Windows NT 5.1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/46.0.2490.86 Safari/537.36",
    "Chilkat/1.0.0 (+http://www.chilkatsoft.com/ChilkatHttpUA.asp)",
    "Mozilla/5.0 (compatible; MSIE 10.0; Windows Phone 8.0; Trident/6.0; IEMobile/10.0; ARM; Touch; Microsoft; Lumia 640 XL)",
    "Mozilla/5.0 (compatible; MSIE 10.0; Windows Phone 8.0; Trident/6.0; IEMobile/10.0; ARM; Touch; Microsoft; Lumia 640 XL",
    "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.5.2171.95 Safari/537.36",
];

/// Web proxy front-ends as (server number, highest ip index).
const PROXY_SERVERS: [(u32, u32); 6] = [(1, 7), (2, 2), (3, 2), (4, 2), (5, 1), (6, 1)];

const PROXY_URL_FIELD: &str = "input[name='u']";
const PROXY_SUBMIT: &str = "input[value='Go']";

pub fn pick_user_agent<R: Rng>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

/// Picks a server uniformly, then an ip index on that server.
pub fn pick_proxy<R: Rng>(rng: &mut R) -> String {
    let (server, max_index) = PROXY_SERVERS
        .choose(rng)
        .copied()
        .unwrap_or(PROXY_SERVERS[0]);
    let index = rng.gen_range(1..=max_index);
    format!("https://{}.hidemyass.com/ip-{}", server, index)
}

/// Bytes windows-1252 leaves unassigned.
const UNDEFINED_CP1252: [u8; 5] = [0x81, 0x8D, 0x8F, 0x90, 0x9D];

/// Keeps the ASCII part of a body served as windows-1252.
///
/// That encoding maps every byte below 0x80 to the same ASCII character and
/// every other assigned byte to non-ASCII, so dropping the high bytes gives the
/// same text as decoding first and dropping afterwards. An unassigned byte makes
/// the body undecodable.
pub fn decode_legacy_ascii(bytes: &[u8]) -> Result<String> {
    if let Some(pos) = bytes.iter().position(|b| UNDEFINED_CP1252.contains(b)) {
        bail!(
            "Byte 0x{:02X} at offset {} is not valid windows-1252",
            bytes[pos],
            pos
        );
    }

    Ok(bytes
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect())
}

/// Something that can turn a URL into page HTML.
pub trait PageSource {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP GET with a random user agent.
pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .cookie_store(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

impl PageSource for DirectFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let user_agent = pick_user_agent(&mut rand::thread_rng());
        debug!("GET {} as '{}'", url, user_agent);

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad status fetching {}", url))?;

        let bytes = response
            .bytes()
            .with_context(|| format!("Failed to read body of {}", url))?;

        decode_legacy_ascii(&bytes).with_context(|| format!("Failed to decode body of {}", url))
    }
}

/// Loads a page through a randomly chosen web proxy in a fresh browser.
pub struct ProxyFetcher {
    headless: bool,
    disable_images: bool,
    navigation_delay: Duration,
    settle_time: Duration,
}

impl ProxyFetcher {
    pub fn new(options: &FetchOptions) -> Self {
        Self {
            headless: options.headless,
            disable_images: options.disable_images,
            navigation_delay: options.navigation_delay,
            settle_time: options.settle_time,
        }
    }

    fn launch(&self) -> Result<Browser> {
        let mut args = Vec::new();
        if !self.headless {
            args.push(OsStr::new("--start-maximized"));
            if self.disable_images {
                args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
            }
        }

        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .args(args)
            .build()
            .context("Failed to build launch options")?;

        Browser::new(options).context("Failed to launch Chrome browser")
    }
}

impl PageSource for ProxyFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        let proxy = pick_proxy(&mut rand::thread_rng());
        debug!("Fetching {} via {}", url, proxy);

        // The browser process is torn down when it goes out of scope
        let browser = self.launch()?;
        let tab = browser.new_tab().context("Failed to open browser tab")?;
        tab.set_user_agent(pick_user_agent(&mut rand::thread_rng()), None, None)?;

        tab.navigate_to(&proxy)
            .with_context(|| format!("Failed to open web proxy {}", proxy))?;
        tab.wait_until_navigated()?;
        thread::sleep(self.navigation_delay);

        tab.wait_for_element(PROXY_URL_FIELD)
            .with_context(|| format!("No URL field on web proxy {}", proxy))?
            .click()?;
        tab.type_str(url)?;
        tab.wait_for_element(PROXY_SUBMIT)
            .with_context(|| format!("No submit button on web proxy {}", proxy))?
            .click()?;

        thread::sleep(self.settle_time);

        tab.get_content()
            .with_context(|| format!("Failed to read {} from web proxy", url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Proxied,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::Proxied => write!(f, "proxied"),
        }
    }
}

/// Chooses a fetch strategy at random for every URL and falls back on failure.
///
/// A failed direct fetch is retried through the proxy for the same URL. A failed
/// proxied fetch goes back to a fresh random choice. Each try counts as one
/// attempt against `max_attempts`, but the cap is only checked before a fresh
/// choice, so a failed direct try always gets its proxied retry.
pub struct FetchSelector {
    direct: Box<dyn PageSource>,
    proxied: Option<Box<dyn PageSource>>,
    max_attempts: Option<u32>,
    retry_delay: Duration,
    rng: StdRng,
}

impl FetchSelector {
    pub fn from_options(options: &FetchOptions) -> Result<Self> {
        let direct: Box<dyn PageSource> = Box::new(DirectFetcher::new()?);
        let proxied: Option<Box<dyn PageSource>> = if options.direct_only {
            None
        } else {
            Some(Box::new(ProxyFetcher::new(options)))
        };

        Ok(Self::new(
            direct,
            proxied,
            options.max_attempts,
            options.retry_delay,
            StdRng::from_entropy(),
        ))
    }

    pub fn new(
        direct: Box<dyn PageSource>,
        proxied: Option<Box<dyn PageSource>>,
        max_attempts: Option<u32>,
        retry_delay: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            direct,
            proxied,
            max_attempts: max_attempts.filter(|&max| max > 0),
            retry_delay,
            rng,
        }
    }

    pub fn fetch(&mut self, url: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        let mut forced = None;

        loop {
            attempt += 1;
            let strategy = forced.take().unwrap_or_else(|| self.pick_strategy());

            match self.source(strategy).fetch(url) {
                Ok(html) => {
                    debug!("Fetched {} ({}, {} bytes)", url, strategy, html.len());
                    return Ok(html);
                }
                Err(e) => warn!("{} fetch of {} failed on attempt {}: {:#}", strategy, url, attempt, e),
            }

            if strategy == Strategy::Direct && self.proxied.is_some() {
                forced = Some(Strategy::Proxied);
            } else {
                if let Some(max) = self.max_attempts {
                    if attempt >= max {
                        bail!("Giving up on {} after {} attempts", url, attempt);
                    }
                }
                info!("Retrying {}...", url);
            }

            thread::sleep(self.retry_delay);
        }
    }

    fn pick_strategy(&mut self) -> Strategy {
        if self.proxied.is_some() && self.rng.gen_bool(0.5) {
            Strategy::Proxied
        } else {
            Strategy::Direct
        }
    }

    fn source(&self, strategy: Strategy) -> &dyn PageSource {
        match (strategy, &self.proxied) {
            (Strategy::Proxied, Some(proxied)) => &**proxied,
            _ => &*self.direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type CallLog = Rc<RefCell<Vec<(Strategy, String)>>>;

    /// Fails a fixed number of times, then succeeds (or never, with `None`).
    struct ScriptedSource {
        strategy: Strategy,
        log: CallLog,
        failures_left: Cell<Option<u32>>,
    }

    impl ScriptedSource {
        fn boxed(strategy: Strategy, log: &CallLog, failures: Option<u32>) -> Box<dyn PageSource> {
            Box::new(Self {
                strategy,
                log: Rc::clone(log),
                failures_left: Cell::new(failures),
            })
        }
    }

    impl PageSource for ScriptedSource {
        fn fetch(&self, url: &str) -> Result<String> {
            self.log.borrow_mut().push((self.strategy, url.to_string()));
            match self.failures_left.get() {
                None => bail!("{} is down", self.strategy),
                Some(0) => Ok(format!("<html>{} {}</html>", self.strategy, url)),
                Some(n) => {
                    self.failures_left.set(Some(n - 1));
                    bail!("{} hiccup", self.strategy)
                }
            }
        }
    }

    fn selector(direct: Option<u32>, proxied: Option<Option<u32>>, max: Option<u32>, seed: u64) -> (FetchSelector, CallLog) {
        let log = CallLog::default();
        let selector = FetchSelector::new(
            ScriptedSource::boxed(Strategy::Direct, &log, direct),
            proxied.map(|failures| ScriptedSource::boxed(Strategy::Proxied, &log, failures)),
            max,
            Duration::ZERO,
            StdRng::seed_from_u64(seed),
        );
        (selector, log)
    }

    #[test]
    fn test_direct_failure_falls_back_to_proxy_for_same_url() {
        for seed in 0..32 {
            let (mut selector, log) = selector(None, Some(Some(0)), Some(10), seed);

            let html = selector.fetch("http://rumahdijual.com/a").unwrap();
            assert!(html.contains("proxied"));

            let calls = log.borrow();
            for (i, (strategy, url)) in calls.iter().enumerate() {
                if *strategy == Strategy::Direct {
                    assert_eq!(calls[i + 1], (Strategy::Proxied, url.clone()));
                }
            }
        }
    }

    #[test]
    fn test_proxy_failure_picks_again_until_success() {
        for seed in 0..32 {
            let (mut selector, log) = selector(Some(0), Some(None), None, seed);

            let html = selector.fetch("http://rumahdijual.com/b").unwrap();
            assert!(html.contains("direct"));
            assert_eq!(log.borrow().last().unwrap().0, Strategy::Direct);
        }
    }

    #[test]
    fn test_direct_failure_on_last_attempt_still_tries_proxy() {
        for seed in 0..64 {
            let (mut selector, log) = selector(None, Some(Some(0)), Some(1), seed);

            let html = selector.fetch("http://rumahdijual.com/x").unwrap();

            assert!(html.contains("proxied"));
            let strategies: Vec<Strategy> = log.borrow().iter().map(|(s, _)| *s).collect();
            assert!(
                strategies == vec![Strategy::Proxied]
                    || strategies == vec![Strategy::Direct, Strategy::Proxied],
                "seed {}: {:?}",
                seed,
                strategies
            );
        }
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        for seed in 0..16 {
            let (mut selector, log) = selector(None, Some(None), Some(5), seed);

            let err = selector.fetch("http://rumahdijual.com/c").unwrap_err();

            let calls = log.borrow();
            assert!(calls.len() == 5 || calls.len() == 6);
            assert_eq!(calls.last().unwrap().0, Strategy::Proxied);
            assert!(err.to_string().contains(&format!("after {} attempts", calls.len())));
        }
    }

    #[test]
    fn test_direct_only_gives_up_after_exactly_max_attempts() {
        let (mut selector, log) = selector(None, None, Some(4), 2);

        let err = selector.fetch("http://rumahdijual.com/f").unwrap_err();

        assert!(err.to_string().contains("after 4 attempts"));
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn test_zero_max_attempts_means_unbounded() {
        let (mut selector, log) = selector(Some(40), None, Some(0), 1);

        selector.fetch("http://rumahdijual.com/d").unwrap();

        assert_eq!(log.borrow().len(), 41);
    }

    #[test]
    fn test_direct_only_never_uses_proxy() {
        let (mut selector, log) = selector(Some(2), None, Some(10), 3);

        let html = selector.fetch("http://rumahdijual.com/e").unwrap();

        assert!(html.contains("direct"));
        assert_eq!(log.borrow().len(), 3);
        assert!(log.borrow().iter().all(|(s, _)| *s == Strategy::Direct));
    }

    #[test]
    fn test_both_strategies_get_picked() {
        let (mut selector, log) = selector(Some(0), Some(Some(0)), None, 11);

        for i in 0..64 {
            selector.fetch(&format!("http://rumahdijual.com/{}", i)).unwrap();
        }

        let calls = log.borrow();
        assert!(calls.iter().any(|(s, _)| *s == Strategy::Direct));
        assert!(calls.iter().any(|(s, _)| *s == Strategy::Proxied));
    }

    #[test]
    fn test_decode_legacy_ascii_drops_high_bytes() {
        let body = b"Rumah \x93murah\x94 di Depok \xe9";
        assert_eq!(decode_legacy_ascii(body).unwrap(), "Rumah murah di Depok ");
    }

    #[test]
    fn test_decode_legacy_ascii_rejects_unassigned_bytes() {
        for byte in UNDEFINED_CP1252 {
            let body = [b'a', byte, b'b'];
            let err = decode_legacy_ascii(&body).unwrap_err();
            assert!(err.to_string().contains("offset 1"));
        }
    }

    #[test]
    fn test_proxy_urls_stay_in_pool() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..200 {
            let proxy = pick_proxy(&mut rng);
            let rest = proxy.strip_prefix("https://").unwrap();
            let (server, index) = rest.split_once(".hidemyass.com/ip-").unwrap();
            let server: u32 = server.parse().unwrap();
            let index: u32 = index.parse().unwrap();
            let max = PROXY_SERVERS.iter().find(|(s, _)| *s == server).unwrap().1;
            assert!((1..=max).contains(&index));
        }
    }

    #[test]
    fn test_user_agent_comes_from_pool() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            assert!(USER_AGENTS.contains(&pick_user_agent(&mut rng)));
        }
    }
}
