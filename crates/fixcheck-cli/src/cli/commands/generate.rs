use crate::cli::args::GenerateArgs;
use super::{config_error, exit_codes, load_harness_config};
use fixcheck_core::dataset::{load_dataset, write_jsonl};
use fixcheck_core::providers::llm::fake::FakeGenerator;
use fixcheck_core::providers::llm::openai::OpenAIGenerator;
use fixcheck_core::providers::llm::CodeGenerator;
use serde_json::{json, Value};

pub async fn cmd_generate(args: GenerateArgs) -> anyhow::Result<i32> {
    let cfg = match load_harness_config(&args.config) {
        Ok(cfg) => cfg,
        Err(msg) => return Ok(config_error(&msg)),
    };
    let generator: Box<dyn CodeGenerator> = match args.provider.as_str() {
        "openai" => {
            let Some(key) = args.api_key.clone() else {
                return Ok(config_error("OPENAI_API_KEY (or --api-key) is required"));
            };
            Box::new(OpenAIGenerator::new(
                args.base_url
                    .clone()
                    .unwrap_or_else(|| cfg.generation.base_url.clone()),
                args.model.clone().unwrap_or_else(|| cfg.generation.model.clone()),
                key,
                cfg.generation.max_tokens,
            ))
        }
        "fake" => {
            if args.fake_responses.is_empty() {
                return Ok(config_error("--provider fake needs at least one --fake-response"));
            }
            Box::new(FakeGenerator {
                responses: args.fake_responses.clone(),
            })
        }
        other => return Ok(config_error(&format!("unknown provider '{other}' (openai|fake)"))),
    };
    if !args.input.is_file() {
        return Ok(config_error(&format!(
            "input file not found: {}",
            args.input.display()
        )));
    }

    let records = load_dataset(&args.input, args.limit)?;
    let mut rows = Vec::with_capacity(records.len());
    let mut generated = 0usize;
    let mut failed = 0usize;
    for rec in records {
        let mut row = rec.raw.clone();
        let prompt = row.get("prompt").and_then(Value::as_str).map(str::to_string);
        if let (Some(prompt), Value::Object(obj)) = (prompt, &mut row) {
            match generator
                .generate(&prompt, args.samples, args.temperature)
                .await
            {
                Ok(completions) => {
                    let responses: Vec<&str> =
                        completions.iter().map(|c| c.response.as_str()).collect();
                    let prompt_tokens: u64 = completions
                        .iter()
                        .map(|c| c.usage.prompt_tokens)
                        .max()
                        .unwrap_or(0);
                    let completion_tokens: u64 =
                        completions.iter().map(|c| c.usage.completion_tokens).sum();
                    obj.insert("responses".into(), json!(responses));
                    obj.insert(
                        "usage".into(),
                        json!({
                            "prompt_tokens": prompt_tokens,
                            "completion_tokens": completion_tokens,
                        }),
                    );
                    generated += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        event = "generation_failed",
                        provider = generator.provider_name(),
                        instance_id = %rec.id(),
                        error = %e
                    );
                    failed += 1;
                }
            }
        }
        rows.push(row);
    }

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    write_jsonl(&args.output, &rows)?;
    eprintln!(
        "generated {generated} of {} records ({failed} failed) -> {}",
        rows.len(),
        args.output.display()
    );
    Ok(if failed == 0 {
        exit_codes::OK
    } else {
        exit_codes::INFRA
    })
}
