//! Per-symbol analysis orchestration.
//!
//! One bounded worker pool drives the watchlist; inside a worker the
//! steps run in order (identity → history → quote+chips → news → LLM →
//! persist → notify), with every step after history degrading to a
//! partial result instead of aborting the symbol. A symbol failure never
//! touches its peers.

use chrono::{Days, Local};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::application::{indicators, report};
use crate::config::Config;
use crate::domain::analysis::{AnalysisResult, MarketSnapshot, ReportType};
use crate::domain::ports::{AnalysisContext, Analyzer, SearchService};
use crate::domain::symbol::Symbol;
use crate::infrastructure::notify::NotificationService;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::sources::FetcherManager;

/// Trading-day window requested from the manager: ~60 sessions needs
/// roughly twice that span in calendar days.
const HISTORY_CALENDAR_DAYS: u64 = 130;
const HISTORY_SESSIONS: usize = 60;

#[derive(Clone)]
pub struct AnalysisPipeline {
    pub config: Arc<Config>,
    pub manager: Arc<FetcherManager>,
    pub analyzer: Arc<dyn Analyzer>,
    pub search: Arc<dyn SearchService>,
    pub db: Arc<Database>,
    pub notifier: Arc<NotificationService>,
}

impl AnalysisPipeline {
    /// Full-watchlist run. Returns one result per requested code.
    pub async fn run(
        &self,
        codes: Option<Vec<String>>,
        query_id: &str,
        dry_run: bool,
        send_notification: bool,
    ) -> Vec<AnalysisResult> {
        let codes = codes.unwrap_or_else(|| self.config.hot_stock_list());
        info!("Analysis run {}: {} symbols", query_id, codes.len());

        let mut symbols = Vec::new();
        let mut results = Vec::new();
        for code in &codes {
            match Symbol::classify(code) {
                Some(symbol) => symbols.push(symbol),
                None => {
                    warn!("Unrecognized ticker: {}", code);
                    results.push(AnalysisResult::failed(
                        code.clone(),
                        query_id,
                        format!("無法識別的代碼: {}", code),
                    ));
                }
            }
        }

        // Warm the shared caches once for the whole batch.
        self.manager.batch_names(&symbols).await;
        self.manager.prefetch_quotes(&symbols).await;

        let single_notify = self.config.single_stock_notify && send_notification;
        let report_type = ReportType::parse(&self.config.report_type);
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));

        let tasks = symbols.into_iter().map(|symbol| {
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            let query_id = query_id.to_string();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                pipeline
                    .process_symbol(
                        symbol,
                        report_type,
                        &query_id,
                        single_notify,
                        dry_run,
                    )
                    .await
            })
        });

        for outcome in join_all(tasks).await {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => error!("analysis worker panicked: {}", e),
            }
        }

        // Batch summary, best score first.
        let mut by_score: Vec<&AnalysisResult> = results.iter().collect();
        by_score.sort_by(|a, b| b.sentiment_score.cmp(&a.sentiment_score));
        for r in &by_score {
            info!(
                "{} {}({}): {} | 評分 {} | {}",
                r.emoji(),
                r.name,
                r.code,
                r.operation_advice,
                r.sentiment_score,
                r.trend_prediction
            );
        }

        if !results.is_empty() {
            let dashboard = report::dashboard_report(&results, report_type);
            let filename = format!("report_{}.md", Local::now().format("%Y%m%d"));
            match self.notifier.save_report_to_file(&dashboard, &filename).await {
                Ok(path) => info!("Report saved: {}", path.display()),
                Err(e) => warn!("Failed to save report: {}", e),
            }

            if send_notification && !single_notify && self.notifier.is_available() {
                if self.notifier.send(&dashboard).await {
                    info!("Dashboard delivered");
                } else {
                    warn!("Dashboard delivery failed on every channel");
                }
            }
        }

        results
    }

    /// Analyze one symbol end to end. Public entry for the task service.
    pub async fn process_single_stock(
        &self,
        code: &str,
        report_type: ReportType,
        query_id: &str,
        single_notify: bool,
    ) -> AnalysisResult {
        match Symbol::classify(code) {
            Some(symbol) => {
                self.process_symbol(symbol, report_type, query_id, single_notify, false)
                    .await
            }
            None => AnalysisResult::failed(code, query_id, format!("無法識別的代碼: {}", code)),
        }
    }

    async fn process_symbol(
        &self,
        symbol: Symbol,
        report_type: ReportType,
        query_id: &str,
        single_notify: bool,
        dry_run: bool,
    ) -> AnalysisResult {
        let code = symbol.code.clone();
        info!("analyzing {}", code);

        // Step 1: identity.
        let name = self
            .manager
            .name(&symbol)
            .await
            .unwrap_or_else(|| code.clone());

        // Step 2: history. The only step whose failure fails the result.
        let end = Local::now().date_naive();
        let start = end
            .checked_sub_days(Days::new(HISTORY_CALENDAR_DAYS))
            .unwrap_or(end);
        let (series, history_source) = match self.manager.daily(&symbol, start, end).await {
            Ok((series, source)) => (series.tail(HISTORY_SESSIONS), source),
            Err(e) => {
                error!("{}: no history available: {}", code, e);
                let mut failed =
                    AnalysisResult::failed(&code, query_id, format!("無歷史數據: {}", e));
                failed.name = name;
                let _ = self.db.insert_analysis(&failed).await;
                return failed;
            }
        };
        let history = indicators::enrich(&series);

        // Step 3: quote and chips come from independent sources.
        let (quote, chips) = tokio::join!(self.manager.quote(&symbol), self.manager.chips(&symbol));

        // Step 4: news search, best effort.
        let (news, search_performed) = if self.search.is_available() && !dry_run {
            let query = format!("{} {} 股票 最新消息", name, code);
            match self.search.search(&query, 5).await {
                Ok(items) => (items, true),
                Err(e) => {
                    warn!("{}: search failed: {}", code, e);
                    (Vec::new(), false)
                }
            }
        } else {
            (Vec::new(), false)
        };

        let mut data_sources = vec![history_source];
        if let Some(q) = &quote {
            if !data_sources.contains(&q.source) {
                data_sources.push(q.source.clone());
            }
        }

        let ctx = AnalysisContext {
            symbol: symbol.clone(),
            name: name.clone(),
            query_id: query_id.to_string(),
            report_type,
            history,
            quote,
            chips,
            news,
            data_sources,
        };

        // Step 5: the LLM draft, or the template fallback.
        let mut result = if dry_run {
            let mut r = Self::template_result(&ctx);
            r.analysis_summary = "dry-run：僅獲取數據，未進行 AI 分析".to_string();
            r
        } else if self.analyzer.is_available() {
            match self.analyzer.analyze(&ctx).await {
                Ok(draft) => draft,
                Err(e) => {
                    warn!("{}: analyzer failed, using template: {}", code, e);
                    Self::template_result(&ctx)
                }
            }
        } else {
            Self::template_result(&ctx)
        };

        // Step 6: merge computed fields and clamp.
        result.code = ctx.symbol.code.clone();
        result.name = ctx.name.clone();
        result.query_id = ctx.query_id.clone();
        result.market_snapshot = ctx.quote.as_ref().and_then(MarketSnapshot::from_quote);
        result.news_items = ctx.news.clone();
        result.data_sources = ctx.data_sources.clone();
        result.search_performed = search_performed;
        result.finalize();

        // Step 7: persist.
        if let Err(e) = self.db.insert_analysis(&result).await {
            warn!("{}: failed to persist result: {}", code, e);
        }
        if self.config.save_context_snapshot {
            if let Ok(payload) = serde_json::to_value(&ctx) {
                if let Err(e) = self
                    .db
                    .insert_context_snapshot(query_id, &code, &payload)
                    .await
                {
                    warn!("{}: failed to persist context snapshot: {}", code, e);
                }
            }
        }

        // Step 8: immediate per-stock notification when requested.
        if single_notify && self.notifier.is_available() {
            let body = report::single_stock_report(&result, report_type);
            if !self.notifier.send(&body).await {
                warn!("{}: single-stock notification failed", code);
            }
        }

        result
    }

    /// Rule-based result used when no LLM is configured (or it failed).
    /// The report clearly reads as template output, but still carries the
    /// computed indicator picture.
    fn template_result(ctx: &AnalysisContext) -> AnalysisResult {
        let mut score: i32 = 50;
        let mut notes = Vec::new();

        if let Some(last) = ctx.history.last() {
            if last.ma5 > last.ma10 && last.ma10 > last.ma20 {
                score += 15;
                notes.push("均線多頭排列".to_string());
            } else if last.ma5 < last.ma10 && last.ma10 < last.ma20 {
                score -= 15;
                notes.push("均線空頭排列".to_string());
            }
            if last.candle.close > last.ma5 {
                score += 5;
            }
            if last.volume_ratio > 1.5 {
                score += 5;
                notes.push(format!("放量（量比 {:.2}）", last.volume_ratio));
            }
            if last.bias_ma5 > 0.05 {
                score -= 10;
                notes.push(format!("乖離率偏高（{:+.1}%）", last.bias_ma5 * 100.0));
            }
        }
        if let Some(chips) = &ctx.chips {
            if chips.profit_ratio > 0.8 {
                notes.push("獲利盤沉重".to_string());
            } else if chips.profit_ratio < 0.2 {
                notes.push("套牢盤較多".to_string());
            }
        }

        let advice = if score >= 65 {
            "持有，回踩均線可加倉"
        } else if score <= 35 {
            "減倉觀望"
        } else {
            "持有觀望"
        };

        let last = ctx.history.last();
        AnalysisResult {
            code: ctx.symbol.code.clone(),
            name: ctx.name.clone(),
            query_id: ctx.query_id.clone(),
            sentiment_score: score,
            operation_advice: advice.to_string(),
            trend_prediction: notes.first().cloned().unwrap_or_else(|| "趨勢不明".into()),
            confidence: 0.3,
            analysis_summary: format!(
                "模板報告（未配置 AI 分析器）。{}",
                notes.join("；")
            ),
            dashboard: crate::domain::analysis::Dashboard {
                core_conclusion: notes.join("；"),
                data_perspective: last
                    .map(|l| {
                        format!(
                            "收盤 {:.2}，MA5 {:.2}，MA10 {:.2}，MA20 {:.2}，支撐 {:.2}，壓力 {:.2}",
                            l.candle.close, l.ma5, l.ma10, l.ma20, l.support, l.resistance
                        )
                    })
                    .unwrap_or_default(),
                ..Default::default()
            },
            success: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::{Candle, CandleSeries};
    use chrono::NaiveDate;

    fn context_with_trend(up: bool) -> AnalysisContext {
        let closes: Vec<f64> = if up {
            (1..=30).map(|i| 10.0 + i as f64 * 0.2).collect()
        } else {
            (1..=30).map(|i| 20.0 - i as f64 * 0.2).collect()
        };
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(i as u64),
                open: close,
                high: close + 0.2,
                low: close - 0.2,
                close,
                volume: 1_000,
                amount: 0.0,
                pct_chg: 0.0,
            })
            .collect();
        let series = CandleSeries::from_raw(candles).unwrap();

        AnalysisContext {
            symbol: Symbol::classify("600519").unwrap(),
            name: "貴州茅台".into(),
            query_id: "q1".into(),
            report_type: ReportType::Simple,
            history: indicators::enrich(&series),
            quote: None,
            chips: None,
            news: Vec::new(),
            data_sources: vec!["eastmoney".into()],
        }
    }

    #[test]
    fn template_result_scores_trend_direction() {
        let up = AnalysisPipeline::template_result(&context_with_trend(true));
        let down = AnalysisPipeline::template_result(&context_with_trend(false));

        assert!(up.sentiment_score > down.sentiment_score);
        assert!(up.success);
        // Decision mapping stays total after finalize.
        let mut up = up;
        up.finalize();
        assert!((0..=100).contains(&up.sentiment_score));
    }

    #[test]
    fn template_result_mentions_missing_analyzer() {
        let r = AnalysisPipeline::template_result(&context_with_trend(true));
        assert!(r.analysis_summary.contains("模板報告"));
    }
}
