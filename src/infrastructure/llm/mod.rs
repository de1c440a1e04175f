//! LLM analyzer client.
//!
//! Speaks the Gemini `generateContent` API when a Gemini key is
//! configured, otherwise an OpenAI-compatible `chat/completions`
//! endpoint. The model's structured draft is parsed out of a JSON block;
//! the pipeline finalizes scores and decisions afterwards.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::analysis::{AnalysisResult, Dashboard, NewsItem};
use crate::domain::overview::MarketOverview;
use crate::domain::ports::{AnalysisContext, Analyzer};

enum Backend {
    Gemini { api_key: String, model: String },
    OpenAi { api_key: String, base_url: String, model: String },
    None,
}

pub struct LlmAnalyzer {
    client: reqwest::Client,
    backend: Backend,
    temperature: f64,
}

impl LlmAnalyzer {
    pub fn from_config(config: &Config) -> Self {
        let backend = if let Some(key) = &config.gemini_api_key {
            Backend::Gemini {
                api_key: key.clone(),
                model: config.gemini_model.clone(),
            }
        } else if let Some(key) = &config.openai_api_key {
            Backend::OpenAi {
                api_key: key.clone(),
                base_url: config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: config.openai_model.clone(),
            }
        } else {
            Backend::None
        };

        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            backend,
            temperature: config.llm_temperature,
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        match &self.backend {
            Backend::Gemini { api_key, model } => {
                let url = format!(
                    "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                    model
                );
                let body = json!({
                    "contents": [{ "parts": [{ "text": prompt }] }],
                    "generationConfig": { "temperature": self.temperature },
                });
                let resp = self
                    .client
                    .post(&url)
                    .header("x-goog-api-key", api_key.as_str())
                    .json(&body)
                    .send()
                    .await
                    .context("gemini request failed")?;
                if !resp.status().is_success() {
                    bail!("gemini returned HTTP {}", resp.status());
                }
                let payload: serde_json::Value = resp.json().await?;
                payload["candidates"][0]["content"]["parts"][0]["text"]
                    .as_str()
                    .map(String::from)
                    .context("gemini response missing text")
            }
            Backend::OpenAi {
                api_key,
                base_url,
                model,
            } => {
                let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
                let body = json!({
                    "model": model,
                    "temperature": self.temperature,
                    "messages": [{ "role": "user", "content": prompt }],
                });
                let resp = self
                    .client
                    .post(&url)
                    .bearer_auth(api_key)
                    .json(&body)
                    .send()
                    .await
                    .context("openai request failed")?;
                if !resp.status().is_success() {
                    bail!("openai returned HTTP {}", resp.status());
                }
                let payload: serde_json::Value = resp.json().await?;
                payload["choices"][0]["message"]["content"]
                    .as_str()
                    .map(String::from)
                    .context("openai response missing content")
            }
            Backend::None => bail!("no LLM backend configured"),
        }
    }

    fn build_prompt(ctx: &AnalysisContext) -> String {
        let mut p = String::new();
        p.push_str(&format!(
            "你是一位严谨的股票分析师。请基于以下数据分析 {}({})，\
             并仅输出一个 JSON 对象（不要 markdown 代码块以外的文字）。\n\n",
            ctx.name, ctx.symbol.code
        ));

        p.push_str("## 近期行情（含均线指标）\n");
        for row in ctx.history.iter().rev().take(10).collect::<Vec<_>>().iter().rev() {
            p.push_str(&format!(
                "{} 收盘 {:.2} 涨跌 {:+.2}% 量比 {:.2} MA5 {:.2} MA10 {:.2} MA20 {:.2} 乖离 {:+.2}%\n",
                row.candle.date,
                row.candle.close,
                row.candle.pct_chg,
                row.volume_ratio,
                row.ma5,
                row.ma10,
                row.ma20,
                row.bias_ma5 * 100.0,
            ));
        }
        if let Some(last) = ctx.history.last() {
            p.push_str(&format!(
                "支撑位约 {:.2}，压力位约 {:.2}\n",
                last.support, last.resistance
            ));
        }

        if let Some(quote) = &ctx.quote {
            p.push_str("\n## 实时行情\n");
            if let Some(price) = quote.price {
                p.push_str(&format!("现价 {:.2}", price));
            }
            if let Some(pct) = quote.change_pct {
                p.push_str(&format!(" 涨跌 {:+.2}%", pct));
            }
            if let Some(vr) = quote.volume_ratio {
                p.push_str(&format!(" 量比 {:.2}", vr));
            }
            if let Some(tr) = quote.turnover_rate {
                p.push_str(&format!(" 换手 {:.2}%", tr));
            }
            p.push('\n');
        }

        if let Some(chips) = &ctx.chips {
            p.push_str(&format!(
                "\n## 筹码分布\n获利比例 {:.1}% 平均成本 {:.2} 90%成本区间 {:.2}-{:.2} 集中度 {:.1}%\n",
                chips.profit_ratio * 100.0,
                chips.avg_cost,
                chips.cost_90_low,
                chips.cost_90_high,
                chips.concentration_90 * 100.0,
            ));
        }

        if !ctx.news.is_empty() {
            p.push_str("\n## 相关资讯\n");
            for item in ctx.news.iter().take(5) {
                p.push_str(&format!("- {}：{}\n", item.title, item.snippet));
            }
        }

        p.push_str(
            "\n## 输出格式\n\
             {\n\
               \"sentiment_score\": 0-100 的整数,\n\
               \"operation_advice\": \"买入/加仓/持有/减仓/卖出 之一并附简短理由\",\n\
               \"trend_prediction\": \"对后市走势的一句话判断\",\n\
               \"confidence\": 0-1 的小数,\n\
               \"analysis_summary\": \"两三句话的总览\",\n\
               \"technical_analysis\": \"技术面分析\",\n\
               \"fundamental_analysis\": \"基本面与消息面分析\",\n\
               \"dashboard\": {\n\
                 \"core_conclusion\": \"核心结论\",\n\
                 \"data_perspective\": \"数据透视\",\n\
                 \"intelligence\": \"情报摘要\",\n\
                 \"battle_plan\": \"操作计划\"\n\
               }\n\
             }\n",
        );
        p
    }

    /// Pull the first JSON object out of the completion, tolerating code
    /// fences and leading prose.
    fn extract_json(text: &str) -> Option<serde_json::Value> {
        let start = text.find('{')?;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in text[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return serde_json::from_str(&text[start..start + i + 1]).ok();
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn draft_from_json(ctx: &AnalysisContext, value: &serde_json::Value) -> AnalysisResult {
        let text = |key: &str| -> String {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let dash = value.get("dashboard").cloned().unwrap_or_default();
        let dash_text = |key: &str| -> String {
            dash.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        AnalysisResult {
            code: ctx.symbol.code.clone(),
            name: ctx.name.clone(),
            query_id: ctx.query_id.clone(),
            sentiment_score: value
                .get("sentiment_score")
                .and_then(|v| v.as_i64())
                .unwrap_or(50) as i32,
            operation_advice: text("operation_advice"),
            trend_prediction: text("trend_prediction"),
            confidence: value
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5),
            analysis_summary: text("analysis_summary"),
            technical_analysis: text("technical_analysis"),
            fundamental_analysis: text("fundamental_analysis"),
            dashboard: Dashboard {
                core_conclusion: dash_text("core_conclusion"),
                data_perspective: dash_text("data_perspective"),
                intelligence: dash_text("intelligence"),
                battle_plan: dash_text("battle_plan"),
            },
            success: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    fn is_available(&self) -> bool {
        !matches!(self.backend, Backend::None)
    }

    async fn analyze(&self, ctx: &AnalysisContext) -> Result<AnalysisResult> {
        let prompt = Self::build_prompt(ctx);
        debug!("analyze[{}]: prompt {} bytes", ctx.symbol.code, prompt.len());

        let completion = self.complete(&prompt).await?;
        match Self::extract_json(&completion) {
            Some(value) => Ok(Self::draft_from_json(ctx, &value)),
            None => {
                warn!(
                    "analyze[{}]: completion had no JSON block, using raw text",
                    ctx.symbol.code
                );
                Ok(AnalysisResult {
                    code: ctx.symbol.code.clone(),
                    name: ctx.name.clone(),
                    query_id: ctx.query_id.clone(),
                    sentiment_score: 50,
                    operation_advice: "持有".to_string(),
                    analysis_summary: completion,
                    confidence: 0.3,
                    success: true,
                    ..Default::default()
                })
            }
        }
    }

    async fn review_market(
        &self,
        overview: &MarketOverview,
        news: &[NewsItem],
    ) -> Result<String> {
        let mut prompt = String::from(
            "你是一位市场策略分析师。请基于以下市场数据写一份当日复盘，\
             包含大盘走势、市场情绪、板块轮动与明日关注点，用 markdown 输出。\n\n",
        );
        for idx in &overview.indices {
            prompt.push_str(&format!(
                "- {}：{:.2}（{:+.2}%）\n",
                idx.name, idx.price, idx.change_pct
            ));
        }
        if let Some(stats) = &overview.stats {
            prompt.push_str(&format!(
                "\n上涨 {} 家，下跌 {} 家，涨停 {}，跌停 {}\n",
                stats.advancing, stats.declining, stats.limit_up, stats.limit_down
            ));
        }
        if let Some(sectors) = &overview.sectors {
            prompt.push_str("\n领涨板块：");
            for s in &sectors.gainers {
                prompt.push_str(&format!("{}({:+.2}%) ", s.name, s.change_pct));
            }
            prompt.push_str("\n领跌板块：");
            for s in &sectors.losers {
                prompt.push_str(&format!("{}({:+.2}%) ", s.name, s.change_pct));
            }
            prompt.push('\n');
        }
        if !news.is_empty() {
            prompt.push_str("\n今日要闻：\n");
            for item in news.iter().take(5) {
                prompt.push_str(&format!("- {}\n", item.title));
            }
        }

        self.complete(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_completion() {
        let completion = "好的，分析如下：\n```json\n{\"sentiment_score\": 72, \
                          \"operation_advice\": \"持有\", \"nested\": {\"a\": 1}}\n```";
        let value = LlmAnalyzer::extract_json(completion).unwrap();
        assert_eq!(value["sentiment_score"], 72);
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn extract_json_handles_braces_in_strings() {
        let completion = "{\"advice\": \"注意{风险}提示\", \"score\": 1}";
        let value = LlmAnalyzer::extract_json(completion).unwrap();
        assert_eq!(value["score"], 1);
    }

    #[test]
    fn extract_json_rejects_plain_prose() {
        assert!(LlmAnalyzer::extract_json("没有结构化内容").is_none());
    }
}
