//! Orchestrates the checker battery and transitive lookups between classes.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, debug_span, trace, warn};

use crate::checkers::{CheckerContext, CheckerKind, MutabilityLookup, TypeMutability};
use crate::config::Configuration;
use crate::hierarchy::HierarchyResolver;
use crate::model::{AnalysisResult, CodeLocation, Reason, ReasonKind, Verdict};
use crate::names::ClassIdentifier;
use crate::source::ClassSource;

/// One analysis run: owns the result cache, hierarchy cache and configuration.
pub struct AnalysisSession {
    configuration: Configuration,
    source: Arc<dyn ClassSource>,
    hierarchy: HierarchyResolver,
    checkers: Vec<CheckerKind>,
    results: DashMap<ClassIdentifier, AnalysisResult>,
    battery_runs: AtomicUsize,
}

/// Classes under analysis on the current call chain, innermost first.
struct InProgress<'a> {
    class: &'a ClassIdentifier,
    parent: Option<&'a InProgress<'a>>,
}

impl InProgress<'_> {
    fn contains(&self, class: &ClassIdentifier) -> bool {
        let mut current = Some(self);
        while let Some(frame) = current {
            if frame.class == class {
                return true;
            }
            current = frame.parent;
        }
        false
    }
}

/// Provisional results of one top-level request, with the in-progress
/// classes each of them assumed immutable.
#[derive(Default)]
struct Provisional {
    entries: RefCell<ProvisionalEntries>,
}

type ProvisionalEntries = HashMap<ClassIdentifier, (AnalysisResult, BTreeSet<ClassIdentifier>)>;

enum Lookup {
    Done {
        result: AnalysisResult,
        /// In-progress classes this result provisionally assumed immutable.
        assumptions: BTreeSet<ClassIdentifier>,
    },
    Cyclic,
}

impl AnalysisSession {
    pub fn new(configuration: Configuration, source: Arc<dyn ClassSource>) -> Self {
        Self {
            hierarchy: HierarchyResolver::new(Arc::clone(&source)),
            configuration,
            source,
            checkers: CheckerKind::ALL.to_vec(),
            results: DashMap::new(),
            battery_runs: AtomicUsize::new(0),
        }
    }

    /// Replace the checker battery.
    pub fn with_checkers(mut self, checkers: Vec<CheckerKind>) -> Self {
        self.checkers = checkers;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn hierarchy(&self) -> &HierarchyResolver {
        &self.hierarchy
    }

    /// Number of results cached so far.
    pub fn cached_results(&self) -> usize {
        self.results.len()
    }

    /// Number of times the checker battery has run on a class.
    pub fn battery_runs(&self) -> usize {
        self.battery_runs.load(Ordering::Relaxed)
    }

    pub fn analyze(&self, class: &ClassIdentifier) -> AnalysisResult {
        let span = debug_span!("analyze", class = %class);
        let _enter = span.enter();
        let provisional = Provisional::default();
        match self.result_for(class, None, &provisional) {
            Lookup::Done { result, .. } => result,
            // Unreachable: cycles are only reported against an enclosing frame.
            Lookup::Cyclic => AnalysisResult::immutable(class.clone()),
        }
    }

    /// Analyse every class in parallel, sharing this session's caches.
    pub fn analyze_all(&self, classes: &[ClassIdentifier]) -> Vec<AnalysisResult> {
        let mut results: Vec<AnalysisResult> = classes
            .par_iter()
            .map(|class| self.analyze(class))
            .collect();
        results.sort_by(|left, right| left.class.cmp(&right.class));
        results.dedup_by(|left, right| left.class == right.class);
        results
    }

    fn result_for(
        &self,
        class: &ClassIdentifier,
        in_progress: Option<&InProgress<'_>>,
        provisional: &Provisional,
    ) -> Lookup {
        if let Some(result) = self.configuration.hardcoded_result(class) {
            return done(result);
        }
        if let Some(cached) = self.results.get(class) {
            trace!(class = %class, "result cache hit");
            return done(cached.value().clone());
        }
        if class.is_primitive() {
            return done(AnalysisResult::immutable(class.clone()));
        }
        if class.is_array() {
            let reason = Reason::new(
                ReasonKind::ArrayTypeInherentlyMutable,
                "Is an array type, so its elements can always be reassigned.",
                CodeLocation::class(class.clone()),
            );
            return done(AnalysisResult::from_reasons(class.clone(), vec![reason]));
        }
        if in_progress.is_some_and(|frame| frame.contains(class)) {
            trace!(class = %class, "cycle detected");
            return Lookup::Cyclic;
        }
        if let Some(reused) =
            in_progress.and_then(|frame| self.reuse_provisional(class, frame, provisional))
        {
            trace!(class = %class, "provisional result reused");
            return reused;
        }

        let Some(definition) = self.source.class(class) else {
            debug!(class = %class, "class not found");
            let reason = Reason::new(
                ReasonKind::CannotAnalyse,
                format!("Class {class} could not be loaded."),
                CodeLocation::class(class.clone()),
            );
            let result = AnalysisResult::from_reasons(class.clone(), vec![reason]);
            self.cache(result.clone());
            return done(result);
        };

        debug!(class = %class, "analysis started");
        let frame = InProgress {
            class,
            parent: in_progress,
        };
        let lookup = SessionLookup {
            session: self,
            current: &frame,
            provisional,
            assumptions: RefCell::new(BTreeSet::new()),
        };
        let context = CheckerContext {
            class: &definition,
            hierarchy: &self.hierarchy,
            configuration: &self.configuration,
            lookup: &lookup,
        };
        self.battery_runs.fetch_add(1, Ordering::Relaxed);
        let mut reasons = Vec::new();
        for checker in &self.checkers {
            match checker.run(&context) {
                Ok(found) => reasons.extend(found),
                Err(err) => {
                    let id = checker.metadata().id;
                    warn!(class = %class, checker = id, error = %err, "checker failed");
                    reasons.push(Reason::new(
                        ReasonKind::CannotAnalyse,
                        format!("Checker {id} could not analyse {class}: {err:#}"),
                        CodeLocation::class(class.clone()),
                    ));
                }
            }
        }

        let result = AnalysisResult::from_reasons(class.clone(), reasons);
        let mut assumptions = lookup.assumptions.into_inner();
        assumptions.remove(class);
        debug!(
            class = %class,
            verdict = %result.verdict,
            reasons = result.reasons.len(),
            provisional = !assumptions.is_empty(),
            "analysis finished"
        );
        if assumptions.is_empty() {
            self.cache(result.clone());
        } else {
            provisional
                .entries
                .borrow_mut()
                .insert(class.clone(), (result.clone(), assumptions.clone()));
        }
        Lookup::Done {
            result,
            assumptions,
        }
    }

    fn cache(&self, result: AnalysisResult) {
        self.results.entry(result.class.clone()).or_insert(result);
    }

    /// An earlier provisional result for `class`, if every assumption it rests
    /// on is still on the call chain or has since been confirmed.
    fn reuse_provisional(
        &self,
        class: &ClassIdentifier,
        frame: &InProgress<'_>,
        provisional: &Provisional,
    ) -> Option<Lookup> {
        let entries = provisional.entries.borrow();
        let (result, assumptions) = entries.get(class)?;
        // Further assumptions can only add reasons.
        if result.verdict == Verdict::NotImmutable {
            return Some(done(result.clone()));
        }
        let mut seen = BTreeSet::from([class.clone()]);
        let confirmed = assumptions
            .iter()
            .all(|assumed| self.assumption_holds(assumed, frame, &entries, &mut seen));
        if !confirmed {
            return None;
        }
        let mut open = BTreeSet::new();
        let mut visited = BTreeSet::new();
        open_assumptions(class, frame, &entries, &mut visited, &mut open);
        Some(Lookup::Done {
            result: result.clone(),
            assumptions: open,
        })
    }

    fn assumption_holds(
        &self,
        assumed: &ClassIdentifier,
        frame: &InProgress<'_>,
        entries: &ProvisionalEntries,
        seen: &mut BTreeSet<ClassIdentifier>,
    ) -> bool {
        if frame.contains(assumed) || seen.contains(assumed) {
            return true;
        }
        if let Some(cached) = self.results.get(assumed) {
            return supports_assumption(cached.verdict);
        }
        let Some((result, nested)) = entries.get(assumed) else {
            return false;
        };
        if !supports_assumption(result.verdict) {
            return false;
        }
        seen.insert(assumed.clone());
        nested
            .iter()
            .all(|next| self.assumption_holds(next, frame, entries, seen))
    }
}

/// A cyclic lookup contributes no reasons, so it stands for these verdicts only.
fn supports_assumption(verdict: Verdict) -> bool {
    matches!(verdict, Verdict::Immutable | Verdict::EffectivelyImmutable)
}

/// Classes on the call chain that `class` transitively assumed immutable.
fn open_assumptions(
    class: &ClassIdentifier,
    frame: &InProgress<'_>,
    entries: &ProvisionalEntries,
    visited: &mut BTreeSet<ClassIdentifier>,
    open: &mut BTreeSet<ClassIdentifier>,
) {
    if !visited.insert(class.clone()) {
        return;
    }
    let Some((_, assumptions)) = entries.get(class) else {
        return;
    };
    for assumed in assumptions {
        if frame.contains(assumed) {
            open.insert(assumed.clone());
        } else {
            open_assumptions(assumed, frame, entries, visited, open);
        }
    }
}

fn done(result: AnalysisResult) -> Lookup {
    Lookup::Done {
        result,
        assumptions: BTreeSet::new(),
    }
}

/// Lookup handed to checkers while one class is in progress.
struct SessionLookup<'s> {
    session: &'s AnalysisSession,
    current: &'s InProgress<'s>,
    provisional: &'s Provisional,
    assumptions: RefCell<BTreeSet<ClassIdentifier>>,
}

impl MutabilityLookup for SessionLookup<'_> {
    fn mutability_of(&self, class: &ClassIdentifier) -> TypeMutability {
        match self
            .session
            .result_for(class, Some(self.current), self.provisional) {
            Lookup::Cyclic => {
                self.assumptions.borrow_mut().insert(class.clone());
                TypeMutability::Cyclic
            }
            Lookup::Done {
                result,
                assumptions,
            } => {
                self.assumptions.borrow_mut().extend(assumptions);
                TypeMutability::Known(result)
            }
        }
    }
}
