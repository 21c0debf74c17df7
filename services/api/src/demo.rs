use crate::infra::LocalAdapters;
use clap::Args;
use trip_intake::config::IntakeConfig;
use trip_intake::error::AppError;
use trip_intake::workflows::intake::{
    AdvanceOutcome, Answers, ApplicantId, FieldKind, FormSchema, IntakeError, TripId,
};

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Trip to apply for.
    #[arg(long, default_value = "sierra-2025")]
    pub(crate) trip: String,
    /// Applicant user id.
    #[arg(long, default_value = "demo-camper")]
    pub(crate) applicant: String,
    /// Decline the rental gear add-on.
    #[arg(long)]
    pub(crate) no_rental: bool,
    /// Fail the first application write to show the retry path.
    #[arg(long)]
    pub(crate) simulate_store_outage: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        trip,
        applicant,
        no_rental,
        simulate_store_outage,
    } = args;

    let adapters = LocalAdapters::seeded();
    let service = adapters.intake_service(&IntakeConfig::default());
    let trip_id = TripId::from(trip);
    let subject = service
        .subject_for(Some(ApplicantId::from(applicant.as_str())))
        .await?;
    let rental = if no_rental { "no" } else { "yes" };

    println!("Trip application demo for {applicant} on {trip_id}");
    let view = service.open(&subject, &trip_id).await?;
    println!("- {}: {}", view.progress.label, view.title);

    let schema = service.schema().clone();
    let mut quote = None;
    for index in 0..schema.len() {
        match service
            .advance(&subject, &trip_id, demo_answers(&schema, index, rental))
            .await?
        {
            AdvanceOutcome::Next(view) => {
                println!("- {}: {}", view.progress.label, view.title);
            }
            AdvanceOutcome::Complete { quote: total, .. } => quote = Some(total),
        }
    }

    let Some(quote) = quote else {
        println!("  Form did not reach the payment step");
        return Ok(());
    };
    match quote.total {
        Some(total) => println!(
            "  Quote: base {:.2} + add-on {:.2} = {:.2}",
            quote.base_fee.unwrap_or_default(),
            quote.add_on_fee,
            total
        ),
        None => {
            println!("  No fee on record for {trip_id}; payment cannot be set up");
            return Ok(());
        }
    }

    let authorization = service
        .prepare_payment(&subject, &trip_id, quote.total)
        .await?;
    println!(
        "  Authorized {} minor units (handle {})",
        authorization.amount_minor_units, authorization.handle
    );

    if simulate_store_outage {
        adapters.store.fail_next_writes(1);
    }

    let submission = match service.confirm_payment(&subject, &trip_id).await {
        Ok(submission) => submission,
        Err(IntakeError::Commit(err)) if err.is_retryable() => {
            println!("  {err}");
            println!("  Retrying submission with the saved draft");
            service.commit(&subject, &trip_id).await?
        }
        Err(err) => {
            println!("  Payment failed: {err}");
            return Ok(());
        }
    };

    println!(
        "- Application {} recorded ({}), redirecting to {}",
        submission.record.application_id,
        submission.record.payment.label(),
        submission.redirect_to
    );

    let founder = service
        .subject_for(Some(ApplicantId::from("founder-1")))
        .await?;
    let rows = service.submissions(&founder, &trip_id).await?;
    match serde_json::to_string_pretty(&rows) {
        Ok(json) => println!("  Submissions visible to the founder:\n{json}"),
        Err(err) => println!("  Submission list unavailable: {err}"),
    }

    if let Some(reference) = adapters.gateway.record_external_payment(27_500) {
        println!("\nReconciliation (injected orphan payment {reference})");
    }
    let report = service.reconcile().await?;
    println!(
        "- inspected {} | matched {} | orphaned {}",
        report.inspected,
        report.matched,
        report.orphaned.len()
    );

    Ok(())
}

fn demo_answers(schema: &FormSchema, section: usize, rental: &str) -> Answers {
    let Some(section) = schema.section(section) else {
        return Answers::new();
    };

    section
        .fields
        .iter()
        .filter_map(|field| {
            let value = match &field.kind {
                _ if field.name == "needs_rental_gear" => rental.to_string(),
                _ if !field.required => return None,
                FieldKind::ShortText => "Jordan".to_string(),
                FieldKind::LongText => "Excited to spend a week in the backcountry.".to_string(),
                FieldKind::Email => "jordan@example.com".to_string(),
                FieldKind::Phone => "515-555-0199".to_string(),
                FieldKind::Date => "1996-05-14".to_string(),
                FieldKind::Number { min, max } => {
                    let low = min.unwrap_or(0.0);
                    max.map_or(low, |high| (low + high) / 2.0).round().to_string()
                }
                FieldKind::Select { options } => options
                    .iter()
                    .find(|option| option.value == "no")
                    .or_else(|| options.first())
                    .map(|option| option.value.clone())?,
            };
            Some((field.name.clone(), value))
        })
        .collect()
}
