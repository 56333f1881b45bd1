// CLI commands for talking to the Gavel API
use anyhow::{bail, Context, Result};
use gavel_common::types::{Language, Submission, TestStatus};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    submission_id: String,
}

/// Register or replace a problem from a JSON definition file.
pub async fn problem_add(api: &str, id: &str, file: &str) -> Result<()> {
    let definition = fs::read_to_string(file)
        .with_context(|| format!("Failed to read problem definition '{}'", file))?;
    let body: serde_json::Value =
        serde_json::from_str(&definition).context("Problem definition is not valid JSON")?;

    let client = reqwest::Client::new();
    let response = client
        .put(format!("{}/problems/{}", api.trim_end_matches('/'), id))
        .json(&body)
        .send()
        .await
        .context("Failed to reach the Gavel API")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("API rejected the problem ({}): {}", status, body);
    }

    println!("✓ Problem '{}' stored", id);
    Ok(())
}

/// Submit a source file; optionally poll until the verdict is terminal.
pub async fn submit(api: &str, problem: &str, language: &str, file: &str, wait: bool) -> Result<()> {
    let Some(language) = Language::from_str(language) else {
        bail!("Unknown language '{}' (valid: python, java, rust)", language);
    };

    let source_code =
        fs::read_to_string(file).with_context(|| format!("Failed to read source file '{}'", file))?;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/submissions", api.trim_end_matches('/')))
        .json(&serde_json::json!({
            "problem_id": problem,
            "language": language,
            "source_code": source_code,
        }))
        .send()
        .await
        .context("Failed to reach the Gavel API")?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("API rejected the submission ({}): {}", status, body);
    }

    let submitted: SubmitResponse = response
        .json()
        .await
        .context("Unexpected response from the API")?;

    println!("✓ Submission queued: {}", submitted.submission_id);

    if wait {
        poll_until_terminal(api, &submitted.submission_id).await?;
    } else {
        println!("  Poll with: gavel-cli status {}", submitted.submission_id);
    }

    Ok(())
}

/// Fetch and render the current status or verdict of a submission.
pub async fn status(api: &str, id: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/submissions/{}", api.trim_end_matches('/'), id))
        .send()
        .await
        .context("Failed to reach the Gavel API")?;

    match response.status().as_u16() {
        200 => {
            let submission: Submission = response
                .json()
                .await
                .context("Unexpected verdict payload from the API")?;
            render_verdict(&submission);
        }
        202 => {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let state = body
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("pending");
            println!("Submission {} is {}", id, state);
        }
        404 => bail!("Unknown submission id: {}", id),
        status => {
            let body = response.text().await.unwrap_or_default();
            bail!("API error ({}): {}", status, body);
        }
    }

    Ok(())
}

async fn poll_until_terminal(api: &str, id: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{}/submissions/{}", api.trim_end_matches('/'), id);

    println!("  Waiting for verdict...");
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let response = client
            .get(&url)
            .send()
            .await
            .context("Failed to reach the Gavel API")?;

        match response.status().as_u16() {
            200 => {
                let submission: Submission = response
                    .json()
                    .await
                    .context("Unexpected verdict payload from the API")?;
                render_verdict(&submission);
                return Ok(());
            }
            202 => continue,
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("API error while polling ({}): {}", status, body);
            }
        }
    }
}

fn render_verdict(submission: &Submission) {
    println!();
    println!("Submission: {}", submission.id);
    println!("Problem:    {}", submission.problem_id);
    println!("Language:   {}", submission.language);
    println!("Status:     {:?}", submission.status);
    println!("Score:      {} / 100", submission.score);
    println!();

    for result in &submission.test_results {
        let marker = if result.status == TestStatus::Passed {
            "✓"
        } else {
            "✗"
        };
        println!(
            "  {} Test {} → {:?} ({}ms, {} attempt{})",
            marker,
            result.test_case_index + 1,
            result.status,
            result.execution_time_ms,
            result.attempts,
            if result.attempts == 1 { "" } else { "s" }
        );
        if let Some(message) = &result.error_message {
            println!("      {}", message);
        }
    }
}
