//! KRONOS API — reference deployment of the approval & leave core.
//!
//! Wires the services to in-memory collaborators, seeds the default
//! calendar configuration and serves the HTTP shell.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use kronos_core::approvals::handlers::{approval_routes, ApprovalAppState};
use kronos_core::approvals::{ApprovalStore, HttpCallbackSender};
use kronos_core::calendar::{
    CalendarHoliday, CalendarService, CalendarStore, HolidayProfile, RecurrenceRule,
    WorkWeekProfile,
};
use kronos_core::clients::{InMemoryConfig, InMemoryDirectory, InMemoryNotifier, LeaveTypeConfig, TracingAuditSink};
use kronos_core::jobs::{Scheduler, SchedulerConfig};
use kronos_core::leaves::handlers::{leave_routes, LeaveAppState};
use kronos_core::leaves::service::APPROVAL_CALLBACK_PATH;
use kronos_core::leaves::{BalanceLedger, LeaveStore};
use kronos_core::{ApprovalService, LeaveService};

/// Italian national holidays, recurrence-based where applicable.
fn seed_calendar(store: &CalendarStore) {
    let mut profile = WorkWeekProfile::mon_fri(Uuid::new_v4());
    profile.name = "Settimana standard".to_string();
    store.insert_work_week_profile(profile);

    let profile_id = Uuid::new_v4();
    store.insert_holiday_profile(HolidayProfile {
        id: profile_id,
        name: "Festività nazionali".to_string(),
        is_active: true,
        created_at: Utc::now(),
    });

    let yearly = [
        ("Capodanno", 1, 1),
        ("Epifania", 1, 6),
        ("Festa della Liberazione", 4, 25),
        ("Festa del Lavoro", 5, 1),
        ("Festa della Repubblica", 6, 2),
        ("Ferragosto", 8, 15),
        ("Ognissanti", 11, 1),
        ("Immacolata Concezione", 12, 8),
        ("Natale", 12, 25),
        ("Santo Stefano", 12, 26),
    ];
    for (name, month, day) in yearly {
        let _ = store.insert_holiday(CalendarHoliday {
            id: Uuid::new_v4(),
            profile_id,
            name: name.to_string(),
            date: None,
            recurrence: Some(RecurrenceRule::Yearly { month, day }),
            is_active: true,
        });
    }
    let _ = store.insert_holiday(CalendarHoliday {
        id: Uuid::new_v4(),
        profile_id,
        name: "Lunedì dell'Angelo".to_string(),
        date: None,
        recurrence: Some(RecurrenceRule::EasterRelative { offset: 1 }),
        is_active: true,
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());

    // Collaborators (in-memory reference implementations).
    let directory = InMemoryDirectory::new();
    let notifier = InMemoryNotifier::new();
    let audit = TracingAuditSink::new();
    let config = InMemoryConfig::new();
    config.insert_leave_type(LeaveTypeConfig::vacation(Uuid::new_v4()));

    // Calendar kernel.
    let calendar_store = CalendarStore::new();
    seed_calendar(&calendar_store);
    let calendar = CalendarService::new(calendar_store);

    // Approval workflow engine.
    let approvals = Arc::new(ApprovalService::new(
        ApprovalStore::new(),
        directory.clone(),
        notifier.clone(),
        audit.clone(),
        Arc::new(HttpCallbackSender::new()),
    ));

    // Leave lifecycle engine, calling back into this process.
    let leaves = Arc::new(LeaveService::new(
        LeaveStore::new(),
        BalanceLedger::new(),
        calendar,
        config,
        directory,
        notifier,
        audit,
        approvals.clone(),
        format!("http://127.0.0.1:{port}{APPROVAL_CALLBACK_PATH}"),
    ));

    let mut scheduler = Scheduler::new(approvals.clone(), SchedulerConfig::default());
    scheduler.start();

    let app = axum::Router::new()
        .route(
            "/health",
            axum::routing::get(|| async {
                axum::Json(serde_json::json!({ "status": "healthy", "service": "kronos-core" }))
            }),
        )
        .nest(
            "/api/v1/approvals",
            approval_routes().with_state(ApprovalAppState {
                service: approvals.clone(),
            }),
        )
        .nest(
            "/api/v1/leaves",
            leave_routes().with_state(LeaveAppState { service: leaves }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("KRONOS core listening on 0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
