use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Selectable option for single-select fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

impl FieldOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Input kinds supported by the intake form renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    ShortText,
    Email,
    Phone,
    Date,
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Select {
        options: Vec<FieldOption>,
    },
    LongText,
}

impl FieldKind {
    pub fn yes_no() -> Self {
        FieldKind::Select {
            options: vec![FieldOption::new("Yes", "yes"), FieldOption::new("No", "no")],
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            FieldKind::ShortText => "text",
            FieldKind::Email => "email",
            FieldKind::Phone => "phone",
            FieldKind::Date => "date",
            FieldKind::Number { .. } => "number",
            FieldKind::Select { .. } => "select",
            FieldKind::LongText => "textarea",
        }
    }
}

/// One typed input within a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_text: Option<String>,
}

impl FormField {
    pub fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            required: false,
            default_value: None,
            helper_text: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_helper(mut self, text: impl Into<String>) -> Self {
        self.helper_text = Some(text.into());
        self
    }
}

/// Ordered group of fields rendered as one step of the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FormField>,
}

impl FormSection {
    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// Errors raised while loading a schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("form schema must contain at least one section")]
    Empty,
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),
    #[error("section '{0}' is declared more than once")]
    DuplicateSection(String),
}

/// Versioned, ordered list of sections. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSchema {
    version: u32,
    sections: Vec<FormSection>,
}

impl FormSchema {
    pub fn new(version: u32, sections: Vec<FormSection>) -> Result<Self, SchemaError> {
        if sections.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut section_ids = BTreeSet::new();
        let mut field_names = BTreeSet::new();
        for section in &sections {
            if !section_ids.insert(section.id.as_str()) {
                return Err(SchemaError::DuplicateSection(section.id.clone()));
            }
            for field in &section.fields {
                if !field_names.insert(field.name.as_str()) {
                    return Err(SchemaError::DuplicateField(field.name.clone()));
                }
            }
        }

        Ok(Self { version, sections })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn sections(&self) -> &[FormSection] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&FormSection> {
        self.sections.get(index)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FormField> {
        self.sections
            .iter()
            .flat_map(|section| section.fields.iter())
            .filter(|field| field.required)
    }

    /// The course application used by the trip program.
    pub fn standard() -> Self {
        Self {
            version: 1,
            sections: vec![personal_section(), medical_section(), rentals_section()],
        }
    }
}

fn personal_section() -> FormSection {
    let gender = FieldKind::Select {
        options: vec![
            FieldOption::new("Male", "male"),
            FieldOption::new("Female", "female"),
            FieldOption::new("Prefer not to say", "na"),
        ],
    };

    FormSection {
        id: "personal".to_string(),
        title: "Personal Information".to_string(),
        description: Some("Basic info and background for this course application.".to_string()),
        fields: vec![
            FormField::new("first_name", "First Name", FieldKind::ShortText).required(),
            FormField::new("last_name", "Last Name", FieldKind::ShortText).required(),
            FormField::new("date_of_birth", "Date of Birth", FieldKind::Date).required(),
            FormField::new("gender", "Gender", gender).required(),
            FormField::new("email", "Email Address", FieldKind::Email).required(),
            FormField::new("phone", "Phone Number", FieldKind::Phone).required(),
            FormField::new("address_line1", "Address", FieldKind::ShortText).required(),
            FormField::new("city", "City", FieldKind::ShortText).required(),
            FormField::new("state", "State", FieldKind::ShortText).required(),
            FormField::new("zip", "Zip Code", FieldKind::ShortText).required(),
            FormField::new(
                "backpacking_experience",
                "Backpacking Experience (1-5)",
                FieldKind::Number {
                    min: Some(1.0),
                    max: Some(5.0),
                },
            )
            .required()
            .with_helper("1 = first time, 5 = very experienced."),
            FormField::new(
                "heard_about_course",
                "How did you hear about this course?",
                FieldKind::LongText,
            )
            .required(),
            FormField::new(
                "interest_in_course",
                "Why are you interested in participating in this course?",
                FieldKind::LongText,
            )
            .required(),
            FormField::new(
                "leaders_should_know",
                "Is there anything important for your course leaders to know about you?",
                FieldKind::LongText,
            ),
            FormField::new(
                "preparation_plan",
                "How do you plan on preparing for this course?",
                FieldKind::LongText,
            )
            .required(),
            FormField::new(
                "questions_or_concerns",
                "Do you have any questions or concerns about the course?",
                FieldKind::LongText,
            ),
        ],
    }
}

fn medical_section() -> FormSection {
    const SCREENING: [(&str, &str); 15] = [
        ("respiratory_problems", "Respiratory problems or asthma?"),
        ("diabetes", "Diabetes?"),
        ("hepatitis_liver_disease", "Hepatitis or other liver disease?"),
        ("seizures", "Seizures or epilepsy?"),
        (
            "urinary_reproductive_disorders",
            "Disorders of the urinary or reproductive tract?",
        ),
        (
            "cardiac_history",
            "Any history of cardiac illness or significant risk factors?",
        ),
        (
            "systemic_allergies",
            "History of systemic allergic reactions (insects, drugs, foods, etc.)?",
        ),
        (
            "other_recent_surgeries",
            "Any surgeries in the past 2 years not mentioned above?",
        ),
        ("gi_issues", "Gastrointestinal disturbances?"),
        ("bleeding_disorders", "Bleeding or blood disorders?"),
        ("dizziness_fainting", "Dizziness or fainting episodes?"),
        (
            "mental_health_recent",
            "Recent mental health condition (last 2 years) or under professional care?",
        ),
        (
            "orthopedic_history",
            "History of knee, hip, ankle, shoulder, arm or back injuries/operations?",
        ),
        (
            "frostbite_or_altitude_history",
            "History of frostbite or acute mountain sickness?",
        ),
        (
            "heat_stroke_history",
            "History of heat stroke or other heat-related illness?",
        ),
    ];

    let mut fields: Vec<FormField> = SCREENING
        .iter()
        .map(|(name, label)| FormField::new(name, label, FieldKind::yes_no()).required())
        .collect();

    fields.extend([
        FormField::new(
            "swimming_ability",
            "Swimming Ability",
            FieldKind::Select {
                options: vec![
                    FieldOption::new("Non-swimmer", "non_swimmer"),
                    FieldOption::new("Recreational", "recreational"),
                    FieldOption::new("Competitive", "competitive"),
                ],
            },
        )
        .required(),
        FormField::new(
            "medical_history_details",
            "Medical history details (please explain any 'Yes' answers above)",
            FieldKind::LongText,
        ),
        FormField::new(
            "dietary_restrictions",
            "Do you have any dietary restrictions or allergies?",
            FieldKind::yes_no(),
        )
        .required(),
        FormField::new(
            "dietary_details",
            "If yes, please describe your dietary restrictions or allergies.",
            FieldKind::LongText,
        ),
        FormField::new(
            "current_medications",
            "Are you taking, or have you been prescribed, any medications in the past two years?",
            FieldKind::yes_no(),
        )
        .required(),
        FormField::new(
            "medication_history",
            "Medication history (name, condition, dosage, frequency, side effects)",
            FieldKind::LongText,
        ),
        FormField::new(
            "emergency_contact_name",
            "Emergency contact full name",
            FieldKind::ShortText,
        )
        .required(),
        FormField::new(
            "emergency_contact_relationship",
            "Relationship to participant",
            FieldKind::ShortText,
        )
        .required(),
        FormField::new(
            "emergency_contact_phone",
            "Emergency contact phone number",
            FieldKind::Phone,
        )
        .required(),
        FormField::new(
            "emergency_contact_phone_backup",
            "Backup phone number",
            FieldKind::Phone,
        ),
    ]);

    FormSection {
        id: "medical".to_string(),
        title: "Medical & Health Information".to_string(),
        description: Some("This information helps us keep you safe during the trip.".to_string()),
        fields,
    }
}

fn rentals_section() -> FormSection {
    FormSection {
        id: "rentals".to_string(),
        title: "Rentals".to_string(),
        description: Some("Let us know if you need gear from us.".to_string()),
        fields: vec![FormField::new(
            "needs_rental_gear",
            "Would you like rental gear?",
            FieldKind::Select {
                options: vec![
                    FieldOption::new(
                        "Yes, rent a backpack, sleeping bag, and sleeping pad (+$150)",
                        "yes",
                    ),
                    FieldOption::new("No, I have the required gear already", "no"),
                ],
            },
        )
        .required()],
    }
}
