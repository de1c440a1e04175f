//! Daily market review.
//!
//! Optional second phase after the per-symbol run: pull indices, breadth
//! stats and sector rankings, have the analyzer narrate them, then
//! persist and notify. Independent of per-symbol failures.

use chrono::Local;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::analysis::NewsItem;
use crate::domain::overview::MarketOverview;
use crate::domain::ports::{Analyzer, SearchService};
use crate::infrastructure::notify::NotificationService;
use crate::infrastructure::sources::FetcherManager;

const SECTOR_COUNT: usize = 5;

pub async fn run_market_review(
    manager: &FetcherManager,
    analyzer: &Arc<dyn Analyzer>,
    search: &Arc<dyn SearchService>,
    notifier: &NotificationService,
    send_notification: bool,
) -> Option<String> {
    info!("Market review: collecting aggregates");

    let overview = manager.market_overview(SECTOR_COUNT).await;
    if overview.is_empty() {
        warn!("Market review: no aggregates available, skipping");
        return None;
    }

    let news = if search.is_available() {
        search
            .search("今日 A股 大盤 收盤 覆盤", 5)
            .await
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let narrative = if analyzer.is_available() {
        match analyzer.review_market(&overview, &news).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Market review: analyzer failed, using template: {}", e);
                template_review(&overview, &news)
            }
        }
    } else {
        template_review(&overview, &news)
    };

    let report = format!("# 🎯 大盤覆盤\n\n{}", narrative);
    let filename = format!("market_review_{}.md", Local::now().format("%Y%m%d"));
    match notifier.save_report_to_file(&report, &filename).await {
        Ok(path) => info!("Market review saved: {}", path.display()),
        Err(e) => warn!("Market review: save failed: {}", e),
    }

    if send_notification && notifier.is_available() {
        if notifier.send(&report).await {
            info!("Market review delivered");
        } else {
            warn!("Market review delivery failed on every channel");
        }
    }

    Some(narrative)
}

fn template_review(overview: &MarketOverview, news: &[NewsItem]) -> String {
    let mut out = String::from("## 指數表現\n");
    for idx in &overview.indices {
        out.push_str(&format!(
            "- {}：{:.2}（{:+.2}%）\n",
            idx.name, idx.price, idx.change_pct
        ));
    }

    if let Some(stats) = &overview.stats {
        out.push_str(&format!(
            "\n## 市場寬度\n上漲 {} 家，下跌 {} 家，平盤 {} 家；漲停 {}，跌停 {}\n",
            stats.advancing, stats.declining, stats.unchanged, stats.limit_up, stats.limit_down
        ));
        if let Some(amount) = stats.total_amount {
            out.push_str(&format!("兩市成交額約 {:.0} 億\n", amount / 1e8));
        }
    }

    if let Some(sectors) = &overview.sectors {
        out.push_str("\n## 板塊輪動\n領漲：");
        for s in &sectors.gainers {
            out.push_str(&format!("{}（{:+.2}%） ", s.name, s.change_pct));
        }
        out.push_str("\n領跌：");
        for s in &sectors.losers {
            out.push_str(&format!("{}（{:+.2}%） ", s.name, s.change_pct));
        }
        out.push('\n');
    }

    if !news.is_empty() {
        out.push_str("\n## 今日要聞\n");
        for item in news.iter().take(5) {
            out.push_str(&format!("- {}\n", item.title));
        }
    }

    out.push_str("\n*模板覆盤（未配置 AI 分析器）*\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::overview::{IndexQuote, MarketStats};

    #[test]
    fn template_review_renders_all_sections() {
        let overview = MarketOverview {
            indices: vec![IndexQuote {
                code: "000001".into(),
                name: "上證指數".into(),
                price: 3250.5,
                change_pct: 0.8,
                amount: Some(5.2e11),
            }],
            stats: Some(MarketStats {
                advancing: 3000,
                declining: 1800,
                unchanged: 200,
                limit_up: 45,
                limit_down: 3,
                total_amount: Some(1.1e12),
            }),
            sectors: None,
        };
        let text = template_review(&overview, &[]);
        assert!(text.contains("上證指數"));
        assert!(text.contains("上漲 3000 家"));
        assert!(text.contains("模板覆盤"));
    }
}
