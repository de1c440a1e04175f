//! EastMoney push2 adapter.
//!
//! Snapshot-oriented: the cheapest quote call downloads the whole market
//! in one page, so quotes are served from the shared TTL snapshot cache.
//! Also the richest aggregate source (indices, breadth stats, sector
//! rankings) and the only chip-distribution upstream.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::candle::{Candle, CandleSeries};
use crate::domain::chips::ChipDistribution;
use crate::domain::errors::{FetchError, FetchResult};
use crate::domain::overview::{IndexQuote, MarketStats, SectorRankings, SectorRow};
use crate::domain::ports::{
    ChipsFetcher, DailyFetcher, ListingFetcher, MarketAggregatesFetcher, QuoteFetcher, Source,
};
use crate::domain::quote::RealtimeQuote;
use crate::domain::symbol::{Market, Symbol};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::sources::{SourceContext, parse_f64};

pub const KEY: &str = "eastmoney";
const ETF_SNAPSHOT_KEY: &str = "eastmoney_etf";

const KLINE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";
const CLIST_URL: &str = "https://push2.eastmoney.com/api/qt/clist/get";
const ULIST_URL: &str = "https://push2.eastmoney.com/api/qt/ulist.np/get";
const CYQ_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/cyq/get";

// Whole A-share universe / listed funds respectively.
const STOCK_FS: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23";
const ETF_FS: &str = "b:MK0021,b:MK0022,b:MK0023,b:MK0024";
const SECTOR_FS: &str = "m:90+t:2+f:!50";

pub struct EastmoneyFetcher {
    ctx: SourceContext,
    priority: i32,
    snapshot_ttl: Duration,
}

impl EastmoneyFetcher {
    pub fn new(ctx: SourceContext, priority: i32, snapshot_ttl: Duration) -> Self {
        Self {
            ctx,
            priority,
            snapshot_ttl,
        }
    }

    async fn get_json(&self, url: String) -> FetchResult<serde_json::Value> {
        self.ctx.gate.wait(KEY).await;
        let resp = self
            .ctx
            .client
            .get(&url)
            .header("Referer", "https://quote.eastmoney.com/")
            .send()
            .await
            .map_err(|e| FetchError::network(KEY, e))?;
        if !resp.status().is_success() {
            return Err(FetchError::network(
                KEY,
                format!("HTTP {} for {}", resp.status(), url),
            ));
        }
        resp.json()
            .await
            .map_err(|e| FetchError::normalization(KEY, e))
    }

    /// Pull one whole-market page into `code -> quote`.
    async fn fetch_snapshot(&self, fs: &str) -> Option<HashMap<String, RealtimeQuote>> {
        let url = build_url_with_query(
            CLIST_URL,
            &[
                ("pn", "1"),
                ("pz", "6000"),
                ("po", "1"),
                ("np", "1"),
                ("fltt", "2"),
                ("invt", "2"),
                ("fid", "f3"),
                ("fs", fs),
                (
                    "fields",
                    "f2,f3,f4,f5,f6,f7,f8,f9,f10,f12,f14,f15,f16,f17,f18,f20,f21,f23,f24,f174,f175",
                ),
            ],
        );

        let body = self.get_json(url).await.ok()?;
        let rows = body.get("data")?.get("diff")?.as_array()?.clone();

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let Some(code) = row.get("f12").and_then(|v| v.as_str()).map(String::from) else {
                continue;
            };
            let mut q = RealtimeQuote::new(code.clone(), KEY);
            q.name = row.get("f14").and_then(|v| v.as_str()).map(String::from);
            q.price = row.get("f2").and_then(parse_f64);
            q.change_pct = row.get("f3").and_then(parse_f64);
            q.change_amount = row.get("f4").and_then(parse_f64);
            // f5 is in lots of 100 shares.
            q.volume = row.get("f5").and_then(parse_f64).map(|v| v * 100.0);
            q.amount = row.get("f6").and_then(parse_f64);
            q.amplitude = row.get("f7").and_then(parse_f64);
            q.turnover_rate = row.get("f8").and_then(parse_f64);
            q.pe = row.get("f9").and_then(parse_f64);
            q.volume_ratio = row.get("f10").and_then(parse_f64);
            q.high = row.get("f15").and_then(parse_f64);
            q.low = row.get("f16").and_then(parse_f64);
            q.open = row.get("f17").and_then(parse_f64);
            q.pre_close = row.get("f18").and_then(parse_f64);
            q.total_mv = row.get("f20").and_then(parse_f64);
            q.circ_mv = row.get("f21").and_then(parse_f64);
            q.pb = row.get("f23").and_then(parse_f64);
            q.change_60d = row.get("f24").and_then(parse_f64);
            q.high_52w = row.get("f174").and_then(parse_f64);
            q.low_52w = row.get("f175").and_then(parse_f64);
            q.derive_change_fields();
            map.insert(code, q);
        }
        if map.is_empty() { None } else { Some(map) }
    }

    async fn snapshot(&self, etf: bool) -> HashMap<String, RealtimeQuote> {
        let (key, fs) = if etf {
            (ETF_SNAPSHOT_KEY, ETF_FS)
        } else {
            (KEY, STOCK_FS)
        };
        self.ctx
            .snapshots
            .get_or_fill(key, self.snapshot_ttl, || self.fetch_snapshot(fs))
            .await
    }
}

impl Source for EastmoneyFetcher {
    fn key(&self) -> &'static str {
        KEY
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn snapshot_oriented(&self) -> bool {
        true
    }

    fn daily(&self) -> Option<&dyn DailyFetcher> {
        Some(self)
    }
    fn quotes(&self) -> Option<&dyn QuoteFetcher> {
        Some(self)
    }
    fn chips(&self) -> Option<&dyn ChipsFetcher> {
        Some(self)
    }
    fn listing(&self) -> Option<&dyn ListingFetcher> {
        Some(self)
    }
    fn aggregates(&self) -> Option<&dyn MarketAggregatesFetcher> {
        Some(self)
    }
}

#[async_trait]
impl DailyFetcher for EastmoneyFetcher {
    async fn daily(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchResult<CandleSeries> {
        if matches!(symbol.market, Market::Us | Market::Tw) {
            return Err(FetchError::unsupported(KEY, "A 股/ETF/港股以外不支持"));
        }

        let secid = match symbol.market {
            Market::Hk => format!("116.{}", symbol.code),
            _ => symbol.eastmoney_secid(),
        };
        let beg = start.format("%Y%m%d").to_string();
        let fin = end.format("%Y%m%d").to_string();
        let url = build_url_with_query(
            KLINE_URL,
            &[
                ("secid", secid.as_str()),
                ("klt", "101"),
                ("fqt", "1"),
                ("beg", beg.as_str()),
                ("end", fin.as_str()),
                ("fields1", "f1,f2,f3"),
                ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61"),
            ],
        );

        let body = self.get_json(url).await?;
        let klines = body
            .get("data")
            .and_then(|d| d.get("klines"))
            .and_then(|k| k.as_array())
            .ok_or_else(|| FetchError::normalization(KEY, "missing data.klines"))?;

        let mut candles = Vec::with_capacity(klines.len());
        for line in klines {
            let line = line
                .as_str()
                .ok_or_else(|| FetchError::normalization(KEY, "kline row not a string"))?;
            // date,open,close,high,low,volume(lots),amount,amplitude,pct_chg,chg,turnover
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() < 9 {
                return Err(FetchError::normalization(
                    KEY,
                    format!("kline row too short: {}", line),
                ));
            }
            let date = parts[0]
                .parse::<NaiveDate>()
                .map_err(|e| FetchError::normalization(KEY, e))?;
            let parse = |i: usize| -> FetchResult<f64> {
                parts[i]
                    .parse()
                    .map_err(|_| FetchError::normalization(KEY, format!("bad number in {}", line)))
            };
            candles.push(Candle {
                date,
                open: parse(1)?,
                close: parse(2)?,
                high: parse(3)?,
                low: parse(4)?,
                volume: (parse(5)? * 100.0) as u64,
                amount: parse(6)?,
                pct_chg: parse(8)?,
            });
        }

        CandleSeries::from_raw(candles).map_err(|e| FetchError::normalization(KEY, e))
    }
}

#[async_trait]
impl QuoteFetcher for EastmoneyFetcher {
    async fn quote(&self, symbol: &Symbol) -> FetchResult<Option<RealtimeQuote>> {
        if matches!(symbol.market, Market::Us | Market::Tw | Market::Hk) {
            return Ok(None);
        }
        let snapshot = self.snapshot(symbol.market.is_etf()).await;
        Ok(snapshot.get(&symbol.code).cloned())
    }
}

#[async_trait]
impl ChipsFetcher for EastmoneyFetcher {
    async fn chips(&self, symbol: &Symbol) -> FetchResult<Option<ChipDistribution>> {
        if !symbol.market.is_a_share() {
            return Ok(None);
        }

        let url = build_url_with_query(
            CYQ_URL,
            &[
                ("secid", symbol.eastmoney_secid().as_str()),
                ("lmt", "1"),
                ("fields1", "f1,f2,f3"),
                ("fields2", "f51,f52,f53,f54,f55,f56,f57,f58,f59"),
            ],
        );

        let body = self.get_json(url).await?;
        let rows = match body
            .get("data")
            .and_then(|d| d.get("data"))
            .and_then(|d| d.as_array())
        {
            Some(rows) if !rows.is_empty() => rows.clone(),
            _ => return Ok(None),
        };

        // Only the latest observation matters.
        let last = rows.last().and_then(|r| r.as_array()).cloned();
        let Some(cols) = last else {
            return Ok(None);
        };
        if cols.len() < 9 {
            return Err(FetchError::normalization(KEY, "cyq row too short"));
        }

        let date = cols[0]
            .as_str()
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .ok_or_else(|| FetchError::normalization(KEY, "cyq row missing date"))?;
        let num = |i: usize| parse_f64(&cols[i]).unwrap_or(0.0);

        Ok(Some(ChipDistribution {
            code: symbol.code.clone(),
            date,
            // Upstream reports percentages; ratios are stored in [0, 1].
            profit_ratio: (num(1) / 100.0).clamp(0.0, 1.0),
            avg_cost: num(2),
            cost_90_low: num(3),
            cost_90_high: num(4),
            concentration_90: (num(5) / 100.0).clamp(0.0, 1.0),
            cost_70_low: num(6),
            cost_70_high: num(7),
            concentration_70: (num(8) / 100.0).clamp(0.0, 1.0),
        }))
    }
}

#[async_trait]
impl ListingFetcher for EastmoneyFetcher {
    async fn name(&self, symbol: &Symbol) -> FetchResult<Option<String>> {
        if !(symbol.market.is_a_share() || symbol.market.is_etf()) {
            return Ok(None);
        }
        let snapshot = self.snapshot(symbol.market.is_etf()).await;
        Ok(snapshot.get(&symbol.code).and_then(|q| q.name.clone()))
    }

    async fn stock_list(&self) -> FetchResult<Option<Vec<(String, String)>>> {
        let snapshot = self.snapshot(false).await;
        if snapshot.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            snapshot
                .iter()
                .filter_map(|(code, q)| q.name.clone().map(|n| (code.clone(), n)))
                .collect(),
        ))
    }
}

#[async_trait]
impl MarketAggregatesFetcher for EastmoneyFetcher {
    async fn indices(&self) -> FetchResult<Option<Vec<IndexQuote>>> {
        // SSE Composite, SZSE Component, ChiNext.
        let url = build_url_with_query(
            ULIST_URL,
            &[
                ("secids", "1.000001,0.399001,0.399006"),
                ("fltt", "2"),
                ("fields", "f2,f3,f6,f12,f14"),
            ],
        );
        let body = self.get_json(url).await?;
        let rows = match body
            .get("data")
            .and_then(|d| d.get("diff"))
            .and_then(|d| d.as_array())
        {
            Some(rows) => rows.clone(),
            None => return Ok(None),
        };

        let mut out = Vec::new();
        for row in rows {
            let (Some(code), Some(name), Some(price)) = (
                row.get("f12").and_then(|v| v.as_str()),
                row.get("f14").and_then(|v| v.as_str()),
                row.get("f2").and_then(parse_f64),
            ) else {
                continue;
            };
            out.push(IndexQuote {
                code: code.to_string(),
                name: name.to_string(),
                price,
                change_pct: row.get("f3").and_then(parse_f64).unwrap_or(0.0),
                amount: row.get("f6").and_then(parse_f64),
            });
        }
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    async fn market_stats(&self) -> FetchResult<Option<MarketStats>> {
        let snapshot = self.snapshot(false).await;
        if snapshot.is_empty() {
            return Ok(None);
        }

        let mut stats = MarketStats::default();
        let mut total_amount = 0.0;
        for q in snapshot.values() {
            let Some(pct) = q.change_pct else { continue };
            if pct > 0.0 {
                stats.advancing += 1;
            } else if pct < 0.0 {
                stats.declining += 1;
            } else {
                stats.unchanged += 1;
            }
            // Main-board limit is ±10%; treat 9.9 as at-limit to absorb
            // rounding in the snapshot feed.
            if pct >= 9.9 {
                stats.limit_up += 1;
            } else if pct <= -9.9 {
                stats.limit_down += 1;
            }
            if let Some(amount) = q.amount {
                total_amount += amount;
            }
        }
        stats.total_amount = (total_amount > 0.0).then_some(total_amount);
        Ok(Some(stats))
    }

    async fn sectors(&self, n: usize) -> FetchResult<Option<SectorRankings>> {
        let url = build_url_with_query(
            CLIST_URL,
            &[
                ("pn", "1"),
                ("pz", "100"),
                ("po", "1"),
                ("np", "1"),
                ("fltt", "2"),
                ("fid", "f3"),
                ("fs", SECTOR_FS),
                ("fields", "f3,f14,f128"),
            ],
        );
        let body = self.get_json(url).await?;
        let rows = match body
            .get("data")
            .and_then(|d| d.get("diff"))
            .and_then(|d| d.as_array())
        {
            Some(rows) => rows.clone(),
            None => return Ok(None),
        };

        let mut sectors: Vec<SectorRow> = rows
            .iter()
            .filter_map(|row| {
                Some(SectorRow {
                    name: row.get("f14")?.as_str()?.to_string(),
                    change_pct: row.get("f3").and_then(parse_f64)?,
                    leader: row
                        .get("f128")
                        .and_then(|v| v.as_str())
                        .filter(|s| !s.is_empty() && *s != "-")
                        .map(String::from),
                })
            })
            .collect();
        if sectors.is_empty() {
            return Ok(None);
        }

        sectors.sort_by(|a, b| {
            b.change_pct
                .partial_cmp(&a.change_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let gainers = sectors.iter().take(n).cloned().collect();
        let losers = sectors.iter().rev().take(n).cloned().collect();
        Ok(Some(SectorRankings { gainers, losers }))
    }
}
