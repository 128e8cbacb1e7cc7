//! Message templates
//!
//! Plain-text subject and body per [`MessageKind`]. Rendering never fails:
//! missing payload fields render empty and unknown kinds fall back to the
//! generic template.

use crate::notify::{keys, MessageKind, Payload};
use crate::step::{Step, STEP_TABLE};
use std::fmt::Write as _;

/// Rendered subject and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

const SIGNATURE: &str = "Best regards,\nRMA Centre";

/// Render a message
#[must_use]
pub fn render(kind: &MessageKind, payload: &Payload) -> Rendered {
    let serial = value(payload, keys::SERIAL_NUMBER);
    let rma_number = value(payload, keys::RMA_NUMBER);

    let subject = match kind {
        MessageKind::AdminNewCase => format!("New RMA Submission – {rma_number}"),
        MessageKind::Submitted => format!("RMA Submission Confirmed – RMA Number {rma_number}"),
        MessageKind::Step(Step::Received) => {
            format!("Confirmation of Product Receipt – Serial Number {serial}")
        }
        MessageKind::Step(Step::Investigating) => {
            format!("Investigation Underway – Serial Number {serial}")
        }
        MessageKind::Step(Step::InProgress) => {
            format!("Update on Your Product – Serial Number {serial}")
        }
        MessageKind::Step(Step::Dispatched) => {
            format!("Repair and Assessment of Warranty Completed – Serial Number {serial}")
        }
        MessageKind::OverdueDigest => {
            format!("RMA Overdue Report ({} items)", value(payload, keys::ITEM_COUNT))
        }
        MessageKind::Other(_) => format!("RMA Update – Serial Number {serial}"),
    };

    let mut body = String::new();
    match kind {
        MessageKind::AdminNewCase => {
            body.push_str("A new RMA request has been submitted.\n\n");
            detail_lines(
                &mut body,
                payload,
                &[
                    ("RMA Number", keys::RMA_NUMBER),
                    ("Customer Name", keys::SENDER),
                    ("Customer Email", keys::CUSTOMER_EMAIL),
                    ("Contact Phone", keys::CONTACT_PHONE),
                    ("Serial Number", keys::SERIAL_NUMBER),
                    ("Product Name", keys::MODEL_NAME),
                    ("Issue Reported", keys::FAULT_DESCRIPTION),
                    ("Address", keys::ADDRESS),
                ],
            );
            body.push_str("\nPlease review this submission and update its status.\n");
        }
        MessageKind::Submitted => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str("Thank you for submitting your RMA request.\n\n");
            detail_lines(
                &mut body,
                payload,
                &[
                    ("RMA Number", keys::RMA_NUMBER),
                    ("Serial Number", keys::SERIAL_NUMBER),
                    ("Product Name", keys::MODEL_NAME),
                    ("Issue Reported", keys::FAULT_DESCRIPTION),
                ],
            );
            body.push_str(
                "\nPlease send your product to our RMA Centre. We will confirm once it arrives.\n",
            );
        }
        MessageKind::Step(Step::Received) => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str("We have received your product and lodged it with our Repair Centre.\n\n");
            detail_lines(
                &mut body,
                payload,
                &[
                    ("Serial Number", keys::SERIAL_NUMBER),
                    ("Product Name", keys::MODEL_NAME),
                    ("Issue Reported", keys::FAULT_DESCRIPTION),
                ],
            );
        }
        MessageKind::Step(Step::Investigating) => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str("Our technical team has started investigating your product's issue.\n\n");
            detail_lines(&mut body, payload, &[("Serial Number", keys::SERIAL_NUMBER)]);
        }
        MessageKind::Step(Step::InProgress) => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str(
                "Diagnosis is complete and the parts needed for the repair have been ordered.\n",
            );
            detail_lines(&mut body, payload, &[("Update", keys::PRODUCT_UPDATE)]);
        }
        MessageKind::Step(Step::Dispatched) => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str("The RMA process for your product is complete and it is on its way back.\n\n");
            detail_lines(
                &mut body,
                payload,
                &[
                    ("Serial Number", keys::SERIAL_NUMBER),
                    ("Repair Performed", keys::REPAIR_DESCRIPTION),
                    ("Tracking Number", keys::TRACKING_NUMBER),
                ],
            );
        }
        MessageKind::OverdueDigest => {
            let _ = writeln!(
                body,
                "{} RMA(s) require immediate attention. Customer updates have been missed.\n",
                value(payload, keys::ITEM_COUNT)
            );
            body.push_str(value(payload, keys::SUMMARY));
            body.push_str("\nTime limits (SLA):\n");
            for spec in &STEP_TABLE {
                let _ = writeln!(body, "  - {}: {} days", spec.sla_window, spec.sla_days);
            }
            body.push_str("\nA CSV file with complete details is attached.\n");
            return Rendered { subject, body };
        }
        MessageKind::Other(_) => {
            greeting(&mut body, value(payload, keys::SENDER));
            body.push_str("There is an update on your RMA request.\n\n");
            let pairs: Vec<(&str, &str)> =
                payload.keys().map(|k| (k.as_str(), k.as_str())).collect();
            detail_lines(&mut body, payload, &pairs);
        }
    }
    body.push('\n');
    body.push_str(SIGNATURE);
    Rendered { subject, body }
}

fn value<'a>(payload: &'a Payload, key: &str) -> &'a str {
    payload.get(key).map_or("", String::as_str)
}

fn greeting(body: &mut String, name: &str) {
    let _ = writeln!(body, "Dear {name},\n");
}

fn detail_lines(body: &mut String, payload: &Payload, fields: &[(&str, &str)]) {
    for (label, key) in fields {
        let _ = writeln!(body, "  {label}: {}", value(payload, key));
    }
}
