use serde::{Deserialize, Serialize};
use std::fmt;

/// Market designation driving per-source ticker formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    AShareSh,
    AShareSz,
    EtfSh,
    EtfSz,
    Hk,
    Tw,
    Us,
    Index,
}

impl Market {
    pub fn is_a_share(&self) -> bool {
        matches!(self, Market::AShareSh | Market::AShareSz)
    }

    pub fn is_etf(&self) -> bool {
        matches!(self, Market::EtfSh | Market::EtfSz)
    }

    pub fn is_shanghai(&self) -> bool {
        matches!(self, Market::AShareSh | Market::EtfSh)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Market::AShareSh => "A-share (SH)",
            Market::AShareSz => "A-share (SZ)",
            Market::EtfSh => "ETF (SH)",
            Market::EtfSz => "ETF (SZ)",
            Market::Hk => "HK",
            Market::Tw => "TW",
            Market::Us => "US",
            Market::Index => "Index",
        };
        write!(f, "{}", s)
    }
}

/// A classified ticker. Immutable; comparable by (market, canonical code).
///
/// This is the single source of truth for ticker shape; sources format
/// through the methods below and never re-parse raw input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub market: Market,
    /// Bare code: 6 digits (A/ETF/Index), 5 digits (HK), 4 digits (TW),
    /// letters (US).
    pub code: String,
}

const SH_ETF_PREFIXES: [&str; 4] = ["51", "52", "56", "58"];
const SZ_ETF_PREFIXES: [&str; 3] = ["15", "16", "18"];

impl Symbol {
    /// Classify a raw ticker string.
    ///
    /// Accepted shapes: `600519`, `600519.SH`, `600519.SS`, `000001.SZ`,
    /// `0700.HK`, `HK00700`, `00700`, `2330.TW`, `8069.TWO`, `AAPL`,
    /// `BRK.B`, and lowercase `sh600519`/`sz000001` prefix forms.
    pub fn classify(raw: &str) -> Option<Symbol> {
        let code = raw.trim().to_uppercase();
        if code.is_empty() {
            return None;
        }

        // Exchange-prefixed form: sh600519 / SZ000001 (also index codes).
        if code.len() == 8 && (code.starts_with("SH") || code.starts_with("SZ")) {
            let digits = &code[2..];
            if digits.chars().all(|c| c.is_ascii_digit()) {
                let shanghai = code.starts_with("SH");
                // 000xxx with an explicit SH designation can only be an
                // index (000xxx stocks all live on SZ).
                let market = if Self::is_index_code(digits) || (shanghai && digits.starts_with("000"))
                {
                    Market::Index
                } else {
                    Self::classify_a_share(digits, shanghai)
                };
                return Some(Symbol {
                    market,
                    code: digits.to_string(),
                });
            }
        }

        // HK prefix form: HK00700, HK700.
        if let Some(digits) = code.strip_prefix("HK") {
            if !digits.is_empty()
                && digits.len() <= 5
                && digits.chars().all(|c| c.is_ascii_digit())
            {
                return Some(Symbol {
                    market: Market::Hk,
                    code: format!("{:0>5}", digits),
                });
            }
        }

        // Suffixed forms.
        if let Some((body, suffix)) = code.rsplit_once('.') {
            match suffix {
                "SS" | "SH" => {
                    if body.len() == 6 && body.chars().all(|c| c.is_ascii_digit()) {
                        let market = if Self::is_index_code(body) || body.starts_with("000") {
                            Market::Index
                        } else {
                            Self::classify_a_share(body, true)
                        };
                        return Some(Symbol {
                            market,
                            code: body.to_string(),
                        });
                    }
                }
                "SZ" => {
                    if body.len() == 6 && body.chars().all(|c| c.is_ascii_digit()) {
                        return Some(Symbol {
                            market: Self::classify_a_share(body, false),
                            code: body.to_string(),
                        });
                    }
                }
                "HK" => {
                    if (4..=5).contains(&body.len()) && body.chars().all(|c| c.is_ascii_digit()) {
                        return Some(Symbol {
                            market: Market::Hk,
                            code: format!("{:0>5}", body),
                        });
                    }
                }
                "TW" | "TWO" => {
                    if body.len() == 4 && body.chars().all(|c| c.is_ascii_digit()) {
                        return Some(Symbol {
                            market: Market::Tw,
                            code: body.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }

        // Bare digit forms.
        if code.chars().all(|c| c.is_ascii_digit()) {
            return match code.len() {
                6 => {
                    let market = if Self::is_index_code(&code) {
                        Market::Index
                    } else {
                        Self::classify_a_share(&code, code.starts_with('6'))
                    };
                    Some(Symbol { market, code })
                }
                5 => Some(Symbol {
                    market: Market::Hk,
                    code,
                }),
                4 => Some(Symbol {
                    market: Market::Tw,
                    code,
                }),
                _ => None,
            };
        }

        // US tickers: 1-5 letters, optional share-class suffix (BRK.B).
        let us = code.len() <= 7
            && code
                .split('.')
                .enumerate()
                .all(|(i, part)| match i {
                    0 => (1..=5).contains(&part.len()) && part.chars().all(|c| c.is_ascii_uppercase()),
                    1 => (1..=2).contains(&part.len()) && part.chars().all(|c| c.is_ascii_uppercase()),
                    _ => false,
                })
            && code.matches('.').count() <= 1;
        if us {
            return Some(Symbol {
                market: Market::Us,
                code,
            });
        }

        None
    }

    fn classify_a_share(digits: &str, shanghai_hint: bool) -> Market {
        let p2 = &digits[..2];
        if SH_ETF_PREFIXES.contains(&p2) {
            return Market::EtfSh;
        }
        if SZ_ETF_PREFIXES.contains(&p2) {
            return Market::EtfSz;
        }
        if digits.starts_with('6') {
            return Market::AShareSh;
        }
        if digits.starts_with("000") || digits.starts_with("001") || digits.starts_with("002")
            || digits.starts_with("003")
            || digits.starts_with("30")
        {
            return Market::AShareSz;
        }
        if shanghai_hint {
            Market::AShareSh
        } else {
            Market::AShareSz
        }
    }

    // 399xxx are SZ indices; 000001/000300-style SH index codes only reach
    // here through an explicit sh prefix or .SH suffix on a 000 code.
    fn is_index_code(digits: &str) -> bool {
        digits.starts_with("399") || digits.starts_with("880")
    }

    /// Eastmoney secid: `1.600519` (SH) / `0.000001` (SZ).
    pub fn eastmoney_secid(&self) -> String {
        let exchange = if self.market.is_shanghai() || self.market == Market::Index && self.code.starts_with("000") {
            '1'
        } else {
            '0'
        };
        format!("{}.{}", exchange, self.code)
    }

    /// Sina hq code: `sh600519` / `sz000001`.
    pub fn sina_code(&self) -> String {
        match self.market {
            Market::Hk => format!("rt_hk{}", self.code),
            _ if self.market.is_shanghai() => format!("sh{}", self.code),
            _ => format!("sz{}", self.code),
        }
    }

    /// Tencent qt code: `sh600519` / `sz000001` / `hk00700` / `usAAPL`.
    pub fn tencent_code(&self) -> String {
        match self.market {
            Market::Hk => format!("hk{}", self.code),
            Market::Us => format!("us{}", self.code),
            _ if self.market.is_shanghai() => format!("sh{}", self.code),
            _ => format!("sz{}", self.code),
        }
    }

    /// Tushare ts_code: `600519.SH` / `000001.SZ`.
    pub fn tushare_code(&self) -> String {
        if self.market.is_shanghai() {
            format!("{}.SH", self.code)
        } else {
            format!("{}.SZ", self.code)
        }
    }

    /// Yahoo Finance symbol: `600519.SS` / `000001.SZ` / `0700.HK` /
    /// `2330.TW` / `AAPL`.
    pub fn yahoo_code(&self) -> String {
        match self.market {
            Market::Us => self.code.clone(),
            Market::Tw => format!("{}.TW", self.code),
            Market::Hk => {
                // Yahoo drops the leading zero of 5-digit HK codes.
                let trimmed = self.code.trim_start_matches('0');
                format!("{:0>4}.HK", trimmed)
            }
            _ if self.market.is_shanghai() => format!("{}.SS", self.code),
            _ => format!("{}.SZ", self.code),
        }
    }

    /// Baostock code: `sh.600519` / `sz.000001`.
    pub fn baostock_code(&self) -> String {
        if self.market.is_shanghai() {
            format!("sh.{}", self.code)
        } else {
            format!("sz.{}", self.code)
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_sh_a_share() {
        for raw in ["600519", "600519.SS", "600519.SH", "sh600519"] {
            let s = Symbol::classify(raw).unwrap();
            assert_eq!(s.market, Market::AShareSh, "{}", raw);
            assert_eq!(s.code, "600519");
        }
    }

    #[test]
    fn classifies_sz_a_share() {
        let s = Symbol::classify("000001").unwrap();
        assert_eq!(s.market, Market::AShareSz);
        let s = Symbol::classify("300750").unwrap();
        assert_eq!(s.market, Market::AShareSz);
    }

    #[test]
    fn classifies_etf_by_prefix() {
        assert_eq!(Symbol::classify("510300").unwrap().market, Market::EtfSh);
        assert_eq!(Symbol::classify("159915").unwrap().market, Market::EtfSz);
        assert_eq!(Symbol::classify("588000").unwrap().market, Market::EtfSh);
    }

    #[test]
    fn classifies_hk_variants() {
        for raw in ["00700", "0700.HK", "HK00700", "hk700"] {
            let s = Symbol::classify(raw).unwrap();
            assert_eq!(s.market, Market::Hk, "{}", raw);
            assert_eq!(s.code, "00700", "{}", raw);
        }
    }

    #[test]
    fn classifies_tw_and_us() {
        assert_eq!(Symbol::classify("2330.TW").unwrap().market, Market::Tw);
        assert_eq!(Symbol::classify("2330").unwrap().market, Market::Tw);
        assert_eq!(Symbol::classify("8069.TWO").unwrap().market, Market::Tw);
        assert_eq!(Symbol::classify("AAPL").unwrap().market, Market::Us);
        assert_eq!(Symbol::classify("BRK.B").unwrap().market, Market::Us);
        assert_eq!(Symbol::classify("tsla").unwrap().market, Market::Us);
    }

    #[test]
    fn classify_is_idempotent_on_canonical_codes() {
        let first = Symbol::classify("hk700").unwrap();
        let second = Symbol::classify(&first.code).unwrap();
        assert_eq!(first, second);

        let first = Symbol::classify("600519.SS").unwrap();
        let second = Symbol::classify(&first.code).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_sh_on_triple_zero_codes_means_index() {
        assert_eq!(Symbol::classify("000001.SH").unwrap().market, Market::Index);
        assert_eq!(Symbol::classify("sh000300").unwrap().market, Market::Index);
        assert_eq!(Symbol::classify("399001").unwrap().market, Market::Index);
        // Bare 000001 stays the SZ stock.
        assert_eq!(Symbol::classify("000001").unwrap().market, Market::AShareSz);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Symbol::classify("").is_none());
        assert!(Symbol::classify("12345678").is_none());
        assert!(Symbol::classify("ABC123").is_none());
    }

    #[test]
    fn per_source_formats() {
        let moutai = Symbol::classify("600519").unwrap();
        assert_eq!(moutai.eastmoney_secid(), "1.600519");
        assert_eq!(moutai.sina_code(), "sh600519");
        assert_eq!(moutai.tencent_code(), "sh600519");
        assert_eq!(moutai.tushare_code(), "600519.SH");
        assert_eq!(moutai.yahoo_code(), "600519.SS");
        assert_eq!(moutai.baostock_code(), "sh.600519");

        let tencent_hk = Symbol::classify("00700").unwrap();
        assert_eq!(tencent_hk.tencent_code(), "hk00700");
        assert_eq!(tencent_hk.yahoo_code(), "0700.HK");

        let pingan = Symbol::classify("000001.SZ").unwrap();
        assert_eq!(pingan.eastmoney_secid(), "0.000001");
        assert_eq!(pingan.tushare_code(), "000001.SZ");
    }
}
