//! Markdown report builders.
//!
//! Two shapes: the per-stock report pushed in single-notify mode, and
//! the batch "decision dashboard" assembled after a full watchlist run.
//! Stocks are separated by `---` lines so the dispatcher can chunk on
//! them.

use chrono::Local;

use crate::domain::analysis::{AnalysisResult, ReportType};

fn score_bar(score: i32) -> String {
    let filled = (score.clamp(0, 100) / 10) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

/// One-stock report. Simple mode keeps it to the verdict and dashboard;
/// full mode appends the long-form analysis sections and news.
pub fn single_stock_report(result: &AnalysisResult, report_type: ReportType) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "## {} {}({})\n\n",
        result.emoji(),
        result.name,
        result.code
    ));

    if !result.success {
        out.push_str(&format!(
            "**分析失敗**：{}\n",
            result
                .error_message
                .as_deref()
                .unwrap_or("未知原因")
        ));
        return out;
    }

    out.push_str(&format!(
        "**評分** {} {} | **建議** {} | **信心** {:.0}%\n",
        result.sentiment_score,
        score_bar(result.sentiment_score),
        result.operation_advice,
        result.confidence * 100.0
    ));
    if !result.trend_prediction.is_empty() {
        out.push_str(&format!("**趨勢** {}\n", result.trend_prediction));
    }

    if let Some(snapshot) = &result.market_snapshot {
        out.push_str(&format!("\n### 即時行情（{}）\n", snapshot.source));
        out.push_str(&format!("現價 {:.2}", snapshot.price));
        if let Some(pct) = snapshot.change_pct {
            out.push_str(&format!(" | 漲跌 {:+.2}%", pct));
        }
        if let Some(vr) = snapshot.volume_ratio {
            out.push_str(&format!(" | 量比 {:.2}", vr));
        }
        if let Some(tr) = snapshot.turnover_rate {
            out.push_str(&format!(" | 換手 {:.2}%", tr));
        }
        out.push('\n');
    }

    let dash = &result.dashboard;
    if !dash.core_conclusion.is_empty() {
        out.push_str(&format!("\n### 核心結論\n{}\n", dash.core_conclusion));
    }
    if !dash.data_perspective.is_empty() {
        out.push_str(&format!("\n### 數據透視\n{}\n", dash.data_perspective));
    }
    if !dash.battle_plan.is_empty() {
        out.push_str(&format!("\n### 作戰計劃\n{}\n", dash.battle_plan));
    }

    if report_type == ReportType::Full {
        if !dash.intelligence.is_empty() {
            out.push_str(&format!("\n### 情報摘要\n{}\n", dash.intelligence));
        }
        if !result.analysis_summary.is_empty() {
            out.push_str(&format!("\n### 分析總覽\n{}\n", result.analysis_summary));
        }
        if !result.technical_analysis.is_empty() {
            out.push_str(&format!("\n### 技術面\n{}\n", result.technical_analysis));
        }
        if !result.fundamental_analysis.is_empty() {
            out.push_str(&format!("\n### 基本面\n{}\n", result.fundamental_analysis));
        }
        if !result.news_items.is_empty() {
            out.push_str("\n### 相關資訊\n");
            for item in result.news_items.iter().take(5) {
                out.push_str(&format!("- [{}]({})\n", item.title, item.url));
            }
        }
    }

    let mut footnotes = Vec::new();
    if !result.data_sources.is_empty() {
        footnotes.push(format!("數據源：{}", result.data_sources.join("/")));
    }
    footnotes.push(if result.search_performed {
        "已檢索新聞".to_string()
    } else {
        "未檢索新聞".to_string()
    });
    out.push_str(&format!("\n*{}*\n", footnotes.join(" · ")));

    out
}

/// Batch dashboard: every stock's report, best score first, separated by
/// `---` so long outputs chunk cleanly per stock.
pub fn dashboard_report(results: &[AnalysisResult], report_type: ReportType) -> String {
    let mut sorted: Vec<&AnalysisResult> = results.iter().collect();
    sorted.sort_by(|a, b| b.sentiment_score.cmp(&a.sentiment_score));

    let date_str = Local::now().format("%Y-%m-%d %H:%M");
    let mut out = format!("# 🚀 個股決策儀表盤 {}\n\n", date_str);

    // Quick signal table up front.
    out.push_str("| 股票 | 評分 | 建議 |\n|---|---|---|\n");
    for r in &sorted {
        out.push_str(&format!(
            "| {} {}({}) | {} | {} |\n",
            r.emoji(),
            r.name,
            r.code,
            r.sentiment_score,
            if r.success {
                r.operation_advice.as_str()
            } else {
                "分析失敗"
            }
        ));
    }
    out.push('\n');

    let sections: Vec<String> = sorted
        .iter()
        .map(|r| single_stock_report(r, report_type))
        .collect();
    out.push_str(&sections.join("\n---\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::analysis::Dashboard;

    fn result(code: &str, score: i32) -> AnalysisResult {
        let mut r = AnalysisResult {
            code: code.to_string(),
            name: format!("股票{}", code),
            sentiment_score: score,
            operation_advice: "持有".into(),
            trend_prediction: "震盪".into(),
            confidence: 0.7,
            success: true,
            dashboard: Dashboard {
                core_conclusion: "核心結論文本".into(),
                data_perspective: "數據透視文本".into(),
                intelligence: "情報文本".into(),
                battle_plan: "作戰計劃文本".into(),
            },
            data_sources: vec!["eastmoney".into()],
            ..Default::default()
        };
        r.finalize();
        r
    }

    #[test]
    fn simple_report_omits_long_sections() {
        let r = result("600519", 70);
        let simple = single_stock_report(&r, ReportType::Simple);
        assert!(simple.contains("核心結論"));
        assert!(!simple.contains("情報摘要"));

        let full = single_stock_report(&r, ReportType::Full);
        assert!(full.contains("情報摘要"));
    }

    #[test]
    fn failed_result_renders_error() {
        let r = AnalysisResult::failed("600519", "q", "無歷史數據".into());
        let report = single_stock_report(&r, ReportType::Simple);
        assert!(report.contains("分析失敗"));
        assert!(report.contains("無歷史數據"));
    }

    #[test]
    fn dashboard_sorts_by_score_and_separates_stocks() {
        let results = vec![result("000001", 40), result("600519", 90)];
        let report = dashboard_report(&results, ReportType::Simple);

        let hi = report.find("600519").unwrap();
        let lo = report.find("000001").unwrap();
        assert!(hi < lo, "higher score should come first");
        assert!(report.contains("\n---\n"));
    }

    #[test]
    fn report_notes_data_sources() {
        let r = result("600519", 70);
        let report = single_stock_report(&r, ReportType::Simple);
        assert!(report.contains("數據源：eastmoney"));
        assert!(report.contains("未檢索新聞"));
    }
}
