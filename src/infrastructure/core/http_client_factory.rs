use reqwest::{Client, NoProxy, Proxy};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use tracing::{debug, warn};

/// Domestic market-data hosts that must bypass any configured proxy:
/// routing them through an overseas proxy gets the IP banned quickly.
const DIRECT_HOSTS: &str = "eastmoney.com,push2.eastmoney.com,push2his.eastmoney.com,\
sina.com.cn,hq.sinajs.cn,gtimg.cn,qt.gtimg.cn,tushare.pro,api.tushare.pro,\
baostock.com,sse.com.cn,szse.cn,localhost,127.0.0.1";

const BROWSER_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Shared client for every upstream source: retry middleware with
    /// exponential backoff (max 3 retries, transient errors only), bounded
    /// timeouts, browser user agent, and proxy-with-domestic-bypass.
    pub fn create_client(proxy_url: Option<&str>) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(30))
            .build_with_max_retries(3);

        let ua = BROWSER_USER_AGENTS[std::process::id() as usize % BROWSER_USER_AGENTS.len()];

        let mut builder = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(ua);

        if let Some(url) = proxy_url {
            match Proxy::all(url) {
                Ok(proxy) => {
                    let no_proxy = Self::no_proxy_list();
                    debug!("HTTP proxy enabled ({}), direct hosts: {}", url, no_proxy);
                    builder = builder.proxy(proxy.no_proxy(NoProxy::from_string(&no_proxy)));
                }
                Err(e) => warn!("Ignoring invalid proxy url {}: {}", url, e),
            }
        }

        let client = builder.build().unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Bypass list: built-in domestic hosts merged with whatever NO_PROXY
    /// already carries.
    fn no_proxy_list() -> String {
        match std::env::var("NO_PROXY").or_else(|_| std::env::var("no_proxy")) {
            Ok(existing) if !existing.trim().is_empty() => {
                let mut hosts: Vec<&str> = existing
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .collect();
                for host in DIRECT_HOSTS.split(',') {
                    if !hosts.contains(&host) {
                        hosts.push(host);
                    }
                }
                hosts.join(",")
            }
            _ => DIRECT_HOSTS.to_string(),
        }
    }
}

/// Build a URL with query parameters appended manually, since
/// reqwest-middleware does not expose `.query()`.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                percent_encode(k.as_ref()),
                percent_encode(v.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn percent_encode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_strings() {
        let url = build_url_with_query("https://x.test/api", &[("a", "1"), ("b", "中文")]);
        assert_eq!(url, "https://x.test/api?a=1&b=%E4%B8%AD%E6%96%87");

        let url = build_url_with_query("https://x.test/api?k=v", &[("a", "1")]);
        assert_eq!(url, "https://x.test/api?k=v&a=1");
    }

    #[test]
    fn empty_params_leave_url_untouched() {
        let url = build_url_with_query::<&str, &str>("https://x.test/api", &[]);
        assert_eq!(url, "https://x.test/api");
    }
}
