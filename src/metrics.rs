use tracing::trace;

// Every counter is recorded through the `metrics` facade, which the installed
// Prometheus recorder renders on `/metrics`, and mirrored as a trace event on
// `labelhub.metrics`.

pub fn inc_requests(route: &'static str) {
    ::metrics::counter!("labelhub_requests_total", "route" => route).increment(1);
    trace!(target = "labelhub.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    ::metrics::histogram!("labelhub_stage_duration_seconds", "stage" => stage)
        .record(elapsed_ms as f64 / 1000.0);
    trace!(
        target = "labelhub.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn task_finished(outcome: &'static str) {
    ::metrics::counter!("labelhub_tasks_finished_total", "outcome" => outcome).increment(1);
    trace!(target = "labelhub.metrics", outcome = outcome, "tasks_finished_total_inc");
}
