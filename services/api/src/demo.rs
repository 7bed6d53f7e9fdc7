use crate::infra::{
    InMemoryAccountRepository, InMemoryAuditTrail, InMemoryCaseRepository,
    InMemoryInterviewCalendar, LoggingNotifier,
};
use caregate::access::{allowed_capabilities, AccountRole, Capability};
use caregate::clock::{Clock, FixedClock};
use caregate::config::{ComplianceConfig, NotificationConfig, VerificationConfig};
use caregate::error::AppError;
use caregate::notify::NotificationDispatcher;
use caregate::workflows::compliance::{ComplianceService, LockState};
use caregate::workflows::verification::{
    ReviewDecision, StageName, SubjectType, VerificationService,
};
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use clap::{Args, ValueEnum};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Scenario {
    /// Send-back and resubmission of a caregiver's certificates
    SendBack,
    /// Seven-day overdue invoice locked in a single tick
    Lockout,
    /// Manual unlock refused without a reason, then granted
    ManualUnlock,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the scripted clock starts on (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Run a single scenario instead of all of them.
    #[arg(long, value_enum)]
    pub(crate) scenario: Option<Scenario>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct AccessArgs {
    /// Limit the table to one role (guardian, agency, caregiver, shop).
    #[arg(long, value_parser = parse_role)]
    pub(crate) role: Option<AccountRole>,
}

fn parse_role(raw: &str) -> Result<AccountRole, String> {
    AccountRole::parse(raw).ok_or_else(|| format!("unknown account role '{raw}'"))
}

struct DemoPlatform {
    verification: VerificationService<InMemoryCaseRepository, InMemoryInterviewCalendar>,
    compliance: ComplianceService<InMemoryAccountRepository>,
    notifier: Arc<LoggingNotifier>,
    clock: Arc<FixedClock>,
}

impl DemoPlatform {
    fn new(today: NaiveDate) -> Self {
        let start = (today.and_time(NaiveTime::MIN) + Duration::hours(9)).and_utc();
        let clock = Arc::new(FixedClock::new(start));
        let audit = Arc::new(InMemoryAuditTrail::default());
        let notifier = Arc::new(LoggingNotifier::default());
        let notifications = Arc::new(NotificationDispatcher::new(
            notifier.clone(),
            NotificationConfig::default(),
        ));

        let verification = VerificationService::new(
            Arc::new(InMemoryCaseRepository::default()),
            Arc::new(InMemoryInterviewCalendar::with_office_hours(start, 7)),
            audit.clone(),
            notifications.clone(),
            clock.clone(),
            &VerificationConfig::default(),
        );
        let compliance = ComplianceService::new(
            Arc::new(InMemoryAccountRepository::default()),
            audit,
            notifications,
            clock.clone(),
            &ComplianceConfig::default(),
        );

        Self {
            verification,
            compliance,
            notifier,
            clock,
        }
    }

    fn notifications_sent(&self) -> Value {
        json!(self.notifier.delivered())
    }
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.today.unwrap_or_else(|| Local::now().date_naive());
    let scenarios = match args.scenario {
        Some(scenario) => vec![scenario],
        None => vec![Scenario::SendBack, Scenario::Lockout, Scenario::ManualUnlock],
    };

    for scenario in scenarios {
        let platform = DemoPlatform::new(today);
        let report = match scenario {
            Scenario::SendBack => send_back_scenario(&platform)?,
            Scenario::Lockout => lockout_scenario(&platform)?,
            Scenario::ManualUnlock => manual_unlock_scenario(&platform)?,
        };
        println!("{report:#}");
    }
    Ok(())
}

fn send_back_scenario(platform: &DemoPlatform) -> Result<Value, AppError> {
    let service = &platform.verification;
    let case_id = service
        .open_case(SubjectType::Caregiver, "caregiver-demo")?
        .value
        .id;

    service.submit_evidence(
        &case_id,
        StageName::Certificates,
        vec!["s3://caregate/demo/nursing-certificate.jpg".to_string()],
    )?;
    service.record_decision(
        &case_id,
        "reviewer-demo",
        ReviewDecision::SendBack,
        Some("blurry scan".to_string()),
    )?;
    platform.clock.advance(Duration::hours(2));
    service.submit_evidence(
        &case_id,
        StageName::Certificates,
        vec!["s3://caregate/demo/nursing-certificate-rescan.pdf".to_string()],
    )?;
    let approved = service.record_decision(
        &case_id,
        "reviewer-demo",
        ReviewDecision::Approve,
        None,
    )?;

    Ok(json!({
        "scenario": "send_back",
        "case": approved.value.status_view(approved.version),
        "audit": service.case_history(&case_id)?,
        "notifications": platform.notifications_sent(),
    }))
}

fn lockout_scenario(platform: &DemoPlatform) -> Result<Value, AppError> {
    let service = &platform.compliance;
    let today = platform.clock.today();
    let account_id = service
        .open_account("guardian-demo", AccountRole::Guardian)?
        .value
        .id;
    service.issue_invoice(&account_id, "INV-DEMO-1", 5000, today - Duration::days(7))?;

    let outcome = service.tick(&account_id, today)?;
    let allowed = allowed_capabilities(AccountRole::Guardian, LockState::Locked);

    Ok(json!({
        "scenario": "lockout",
        "transition": outcome.transition,
        "account": service.account_view(&account_id)?,
        "can_book_caregivers": allowed.contains(&Capability::BookNewCaregivers),
        "can_make_payment": allowed.contains(&Capability::MakePayment),
        "notifications": platform.notifications_sent(),
    }))
}

fn manual_unlock_scenario(platform: &DemoPlatform) -> Result<Value, AppError> {
    let service = &platform.compliance;
    let today = platform.clock.today();
    let account_id = service
        .open_account("agency-demo", AccountRole::Agency)?
        .value
        .id;
    service.issue_invoice(&account_id, "INV-DEMO-2", 12000, today - Duration::days(9))?;
    service.tick(&account_id, today)?;

    let refused = match service.manual_unlock(&account_id, "admin-demo", "") {
        Ok(_) => None,
        Err(err) => Some(json!({ "kind": err.kind(), "error": err.to_string() })),
    };
    service.manual_unlock(
        &account_id,
        "admin-demo",
        "payment confirmed via bank transfer",
    )?;

    Ok(json!({
        "scenario": "manual_unlock",
        "refused_attempt": refused,
        "account": service.account_view(&account_id)?,
        "audit": service.account_history(&account_id)?,
        "notifications": platform.notifications_sent(),
    }))
}

pub(crate) fn run_access_table(args: AccessArgs) -> Result<(), AppError> {
    let roles: Vec<AccountRole> = match args.role {
        Some(role) => vec![role],
        None => AccountRole::ordered().to_vec(),
    };

    for role in roles {
        println!("{}", role.label());
        for state in LockState::ordered() {
            let allowed = allowed_capabilities(role, state);
            let labels: Vec<&str> = allowed.iter().map(|capability| capability.label()).collect();
            println!("  {:<16} {}", state.label(), labels.join(", "));
        }
    }
    Ok(())
}
