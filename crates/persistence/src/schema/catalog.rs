//! Built-in schemas for the platform's core collections.

use serde_json::json;

use super::{FieldType, SchemaDefinition, SchemaRegistry};

/// Registry covering the directory, booking, commerce, learning and forum
/// collections used across the platform.
pub fn platform_schemas() -> SchemaRegistry {
    SchemaRegistry::builder()
        .collection(
            "users",
            SchemaDefinition::new()
                .required(["email", "name", "role"])
                .field("email", FieldType::String)
                .field("phone", FieldType::String)
                .field("role", FieldType::String)
                .default_value("role", json!("patient"))
                .default_value("status", json!("active"))
                .default_value("verified", json!(false)),
        )
        .collection(
            "doctors",
            SchemaDefinition::new()
                .required(["name", "specialty"])
                .field("specialty", FieldType::String)
                .field("hospital_id", FieldType::String)
                .field("consultation_fee", FieldType::Number)
                .field("rating", FieldType::Number)
                .default_value("rating", json!(0))
                .default_value("available", json!(true))
                .default_value("verified", json!(false)),
        )
        .collection(
            "hospitals",
            SchemaDefinition::new()
                .required(["name", "city"])
                .field("departments", FieldType::Array)
                .field("beds", FieldType::Number)
                .default_value("departments", json!([]))
                .default_value("status", json!("active")),
        )
        .collection(
            "appointments",
            SchemaDefinition::new()
                .required(["patient_id", "doctor_id", "date", "time"])
                .field("date", FieldType::Date)
                .field("time", FieldType::String)
                .field("slot_id", FieldType::String)
                .default_value("status", json!("pending"))
                .default_value("type", json!("in-person"))
                .default_value("payment_status", json!("unpaid")),
        )
        .collection(
            "slots",
            SchemaDefinition::new()
                .required(["doctor_id", "date", "time"])
                .field("date", FieldType::Date)
                .field("booking_id", FieldType::String)
                .default_value("status", json!("available")),
        )
        .collection(
            "products",
            SchemaDefinition::new()
                .required(["name", "price"])
                .field("price", FieldType::Number)
                .field("stock", FieldType::Number)
                .field("category", FieldType::String)
                .default_value("stock", json!(0))
                .default_value("requires_prescription", json!(false))
                .default_value("status", json!("active")),
        )
        .collection(
            "orders",
            SchemaDefinition::new()
                .required(["user_id", "items", "total"])
                .field("items", FieldType::Array)
                .field("total", FieldType::Number)
                .field("payment_reference", FieldType::String)
                .default_value("status", json!("pending"))
                .default_value("payment_status", json!("unpaid")),
        )
        .collection(
            "courses",
            SchemaDefinition::new()
                .required(["title", "instructor_id"])
                .field("modules", FieldType::Array)
                .field("price", FieldType::Number)
                .default_value("modules", json!([]))
                .default_value("price", json!(0))
                .default_value("published", json!(false)),
        )
        .collection(
            "enrollments",
            SchemaDefinition::new()
                .required(["user_id", "course_id"])
                .field("progress", FieldType::Number)
                .default_value("progress", json!(0))
                .default_value("completed_lessons", json!([]))
                .default_value("status", json!("active")),
        )
        .collection(
            "forum_posts",
            SchemaDefinition::new()
                .required(["author_id", "title", "body"])
                .field("tags", FieldType::Array)
                .field("replies", FieldType::Array)
                .default_value("tags", json!([]))
                .default_value("replies", json!([]))
                .default_value("likes", json!(0)),
        )
        .collection(
            "notifications",
            SchemaDefinition::new()
                .required(["recipient", "template"])
                .field("data", FieldType::Object)
                .default_value("channel", json!("email"))
                .default_value("read", json!(false)),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_registers_core_collections() {
        let registry = platform_schemas();
        for name in ["users", "doctors", "appointments", "slots", "orders", "courses"] {
            assert!(registry.get(name).is_some(), "missing schema for {name}");
        }
    }

    #[test]
    fn appointment_defaults_to_pending() {
        let registry = platform_schemas();
        let doc = json!({"patient_id": "1", "doctor_id": "2", "date": "2026-11-02", "time": "09:30"});
        let merged = registry.apply_defaults("appointments", doc.as_object().unwrap());
        assert_eq!(merged["status"], "pending");
        assert!(registry.validate("appointments", &merged).is_ok());
    }

    #[test]
    fn default_role_satisfies_required_role() {
        let registry = platform_schemas();
        let doc = json!({"email": "ada@example.org", "name": "Ada"});
        let merged = registry.apply_defaults("users", doc.as_object().unwrap());
        assert!(registry.validate("users", &merged).is_ok());
        assert_eq!(merged["role"], "patient");
    }
}
