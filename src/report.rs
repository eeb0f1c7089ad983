use std::fmt::Write as _;

use anyhow::Result;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, Location, LogicalLocation, Message, MultiformatMessageString,
    ReportingDescriptor, Result as SarifResult, ResultLevel, Run, Sarif, Tool, ToolComponent,
    SCHEMA_URL,
};

use crate::model::{AnalysisResult, CodeLocation, Reason, ReasonKind, Verdict};

/// Plain-text report: one `<class> <VERDICT>` line per class.
pub fn render_text(results: &[AnalysisResult], verbose: bool) -> String {
    let mut out = String::new();
    for result in results {
        let _ = writeln!(out, "{} {}", result.class, result.verdict);
        if verbose {
            for reason in &result.reasons {
                let _ = writeln!(
                    out,
                    "  [{}] {} ({})",
                    reason.kind, reason.message, reason.location
                );
            }
        }
    }
    out
}

pub fn build_sarif(
    results: &[AnalysisResult],
    artifacts: Vec<Artifact>,
    invocation: Invocation,
) -> Result<Sarif> {
    let driver = ToolComponent::builder()
        .name("mutascope")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(rule_descriptors())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };

    let mut sarif_results = Vec::new();
    for result in results {
        for reason in &result.reasons {
            sarif_results.push(sarif_result(result, reason)?);
        }
    }

    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(sarif_results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(sarif_results)
            .artifacts(artifacts)
            .build()
    };

    Ok(Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build())
}

fn rule_descriptors() -> Vec<ReportingDescriptor> {
    ReasonKind::ALL
        .iter()
        .map(|kind| {
            ReportingDescriptor::builder()
                .id(kind.tag())
                .short_description(
                    MultiformatMessageString::builder()
                        .text(format!("Contributes {}", kind.verdict()))
                        .build(),
                )
                .build()
        })
        .collect()
}

fn sarif_result(result: &AnalysisResult, reason: &Reason) -> Result<SarifResult> {
    // Configured results carry the configured verdict, not their kind's.
    let verdict = match reason.kind {
        ReasonKind::HardcodedResult => result.verdict,
        kind => kind.verdict(),
    };
    Ok(SarifResult::builder()
        .rule_id(reason.kind.tag())
        .level(level(verdict))
        .message(Message::builder().text(reason.message.clone()).build())
        .locations(vec![location(&reason.location)])
        .build())
}

fn level(verdict: Verdict) -> ResultLevel {
    match verdict {
        Verdict::NotImmutable => ResultLevel::Error,
        Verdict::CouldNotAnalyse => ResultLevel::Warning,
        Verdict::Immutable | Verdict::EffectivelyImmutable => ResultLevel::Note,
    }
}

fn location(location: &CodeLocation) -> Location {
    let kind = match location {
        CodeLocation::Class { .. } => "type",
        CodeLocation::Field { .. } => "member",
    };
    let logical = LogicalLocation::builder()
        .name(location.to_string())
        .kind(kind)
        .build();
    Location::builder().logical_locations(vec![logical]).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::ClassIdentifier;

    fn results() -> Vec<AnalysisResult> {
        let lazy = ClassIdentifier::new("com.example.Lazy");
        let bits = ClassIdentifier::new("com.example.Bits");
        vec![
            AnalysisResult::immutable(ClassIdentifier::new("com.example.Name")),
            AnalysisResult::from_reasons(
                lazy.clone(),
                vec![Reason::new(
                    ReasonKind::NonFinalField,
                    "Field is not final.",
                    CodeLocation::field(lazy, "cached"),
                )],
            ),
            AnalysisResult::from_reasons(
                bits.clone(),
                vec![Reason::new(
                    ReasonKind::ArrayTypeInherentlyMutable,
                    "Field [bits] is an array.",
                    CodeLocation::field(bits, "bits"),
                )],
            ),
        ]
    }

    fn invocation() -> Invocation {
        Invocation::builder()
            .execution_successful(true)
            .arguments(Vec::<String>::new())
            .build()
    }

    #[test]
    fn text_report_lists_one_line_per_class() {
        let text = render_text(&results(), false);
        assert_eq!(
            "com.example.Name IMMUTABLE\n\
             com.example.Lazy EFFECTIVELY_IMMUTABLE\n\
             com.example.Bits NOT_IMMUTABLE\n",
            text
        );
    }

    #[test]
    fn verbose_text_report_lists_reasons() {
        let text = render_text(&results()[1..2], true);
        assert_eq!(
            "com.example.Lazy EFFECTIVELY_IMMUTABLE\n  [NON_FINAL_FIELD] Field is not final. (com.example.Lazy.cached)\n",
            text
        );
    }

    #[test]
    fn sarif_has_one_result_per_reason() {
        let sarif = build_sarif(&results(), Vec::new(), invocation()).expect("sarif");
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");

        assert_eq!(value["version"], "2.1.0");
        assert_eq!(value["$schema"], SCHEMA_URL);
        let run = &value["runs"][0];
        assert_eq!(run["tool"]["driver"]["name"], "mutascope");
        assert_eq!(
            run["tool"]["driver"]["rules"].as_array().map(Vec::len),
            Some(ReasonKind::ALL.len())
        );

        let sarif_results = run["results"].as_array().expect("results array");
        assert_eq!(2, sarif_results.len());
        assert_eq!(sarif_results[0]["ruleId"], "NON_FINAL_FIELD");
        assert_eq!(sarif_results[0]["level"], "note");
        assert_eq!(sarif_results[1]["ruleId"], "ARRAY_TYPE_INHERENTLY_MUTABLE");
        assert_eq!(sarif_results[1]["level"], "error");
        let logical = &sarif_results[1]["locations"][0]["logicalLocations"][0];
        assert_eq!(logical["name"], "com.example.Bits.bits");
        assert_eq!(logical["kind"], "member");
    }

    #[test]
    fn hardcoded_reason_uses_configured_verdict() {
        let class = ClassIdentifier::new("com.example.Legacy");
        let result = AnalysisResult::with_verdict(
            class.clone(),
            Verdict::CouldNotAnalyse,
            vec![Reason::new(
                ReasonKind::HardcodedResult,
                "configured",
                CodeLocation::class(class),
            )],
        );
        let sarif = build_sarif(&[result], Vec::new(), invocation()).expect("sarif");
        let value = serde_json::to_value(&sarif).expect("serialize SARIF");
        let sarif_result = &value["runs"][0]["results"][0];

        assert_eq!(sarif_result["level"], "warning");
        assert_eq!(
            sarif_result["locations"][0]["logicalLocations"][0]["kind"],
            "type"
        );
    }
}
