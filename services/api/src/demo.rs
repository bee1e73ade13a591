use crate::infra::LoggingDeliveryChannel;
use chrono::{Duration, Utc};
use clap::Args;
use servicehub::config::NotificationConfig;
use servicehub::error::AppError;
use servicehub::marketplace::{
    Actor, Marketplace, ModerationDecision, NewBooking, Notification, NotificationFilter,
    ReviewDraft, SystemClock,
};
use std::sync::Arc;

const DEMO_ADMIN: &str = "ops-admin";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of technicians bidding on the demo booking
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=9))]
    pub(crate) technicians: u8,
    /// Print every inbox as JSON instead of a table
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = NotificationConfig {
        admin_ids: vec![DEMO_ADMIN.to_string()],
        ..NotificationConfig::default()
    };
    let marketplace = Marketplace::in_memory(
        Arc::new(LoggingDeliveryChannel),
        Arc::new(SystemClock),
        config,
    );
    let lifecycle = marketplace.lifecycle();
    let pipeline = marketplace.pipeline();

    let customer = Actor::customer("cust-demo");
    let technicians: Vec<Actor> = (1..=args.technicians)
        .map(|n| Actor::technician(format!("tech-{n:02}")))
        .collect();

    println!("Service marketplace demo");
    let created = lifecycle.create_booking(
        &customer,
        NewBooking {
            service_id: "svc-water-heater".to_string(),
            scheduled_at: Utc::now() + Duration::days(2),
            amount_cents: 18_900,
        },
    )?;
    pipeline.publish(&created.events);
    let booking_id = created.booking.id;
    println!("- booking {booking_id} created by {}", customer.id);

    lifecycle.open_bidding(&customer, &booking_id)?;
    let mut bid_ids = Vec::new();
    for (index, technician) in technicians.iter().enumerate() {
        let price = 17_500 + 700 * index as u64;
        let outcome = lifecycle.submit_bid(technician, &booking_id, price)?;
        pipeline.publish(&outcome.events);
        if let Some(bid) = outcome.bids.first() {
            println!("- {} bid {} cents ({})", technician.id, price, bid.id);
            bid_ids.push(bid.id.clone());
        }
    }

    let Some(winning_bid) = bid_ids.first() else {
        return Ok(());
    };
    let accepted = lifecycle.accept_bid(&customer, winning_bid)?;
    let fanned_out = pipeline.publish(&accepted.events);
    println!(
        "- accepted {winning_bid}: {} notifications ({})",
        fanned_out.len(),
        accepted
            .events
            .iter()
            .map(|event| event.kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let winner = &technicians[0];
    lifecycle.start_booking(winner, &booking_id)?;
    let completed = lifecycle.complete_booking(winner, &booking_id)?;
    pipeline.publish(&completed.events);
    println!("- {} completed the job", winner.id);

    let review = lifecycle.submit_review(
        &customer,
        ReviewDraft {
            appointment_id: booking_id.clone(),
            rating: 5,
            comment: Some("Hot water is back".to_string()),
        },
    )?;
    pipeline.publish(&review.events);
    let approved = lifecycle.moderate_review(
        &Actor::admin(DEMO_ADMIN),
        &review.review.id,
        ModerationDecision::Approve,
    )?;
    pipeline.publish(&approved.events);
    println!("- review {} approved", approved.review.id);

    let stats = marketplace
        .stats()
        .stats(&customer.id)
        .map_err(|err| AppError::Io(std::io::Error::other(err)))?;
    println!(
        "- {} has {} completed booking(s), {} cents spent",
        stats.customer_id, stats.total_bookings, stats.total_spent_cents
    );

    let mut recipients = vec![customer.id.clone(), DEMO_ADMIN.to_string()];
    recipients.extend(technicians.iter().map(|technician| technician.id.clone()));

    println!("\nInboxes");
    for recipient in recipients {
        let inbox = marketplace
            .notifications()
            .list(&recipient, &NotificationFilter::default())
            .map_err(|err| AppError::Io(std::io::Error::other(err)))?;
        render_inbox(&recipient, &inbox, args.json)?;
    }

    Ok(())
}

fn render_inbox(recipient: &str, inbox: &[Notification], as_json: bool) -> Result<(), AppError> {
    if as_json {
        let rendered = serde_json::to_string_pretty(inbox)
            .map_err(|err| AppError::Io(std::io::Error::other(err)))?;
        println!("{recipient}: {rendered}");
        return Ok(());
    }

    println!("{recipient} ({} notifications)", inbox.len());
    for row in inbox {
        println!(
            "  [{:<6}] {:<20} {}",
            row.priority.label(),
            row.kind,
            row.message
        );
    }
    Ok(())
}
