use crate::model::{
    AttendanceRecord, Class, ClassEnrollment, ClassNote, Dataset, EntityKind, HomeworkAssignment,
    HomeworkSubmission, Meeting, Record, Schedule, ScheduleException, Student, Test, TestResult,
    User, SYSTEM_USER_ID,
};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    #[serde(serialize_with = "entity_name")]
    pub entity: EntityKind,
    /// Empty when the record itself has no id.
    pub entity_id: String,
    pub field: String,
    pub message: String,
}

fn entity_name<S: Serializer>(kind: &EntityKind, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(kind.entity_name())
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} {}: {}",
            self.entity, self.entity_id, self.field, self.message
        )
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern"))
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("time pattern"))
}

pub fn is_valid_email(s: &str) -> bool {
    email_re().is_match(s)
}

/// 24-hour `HH:MM`.
pub fn is_valid_time(s: &str) -> bool {
    time_re().is_match(s)
}

/// ISO `YYYY-MM-DD`.
pub fn is_valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

/// Collects the errors of one record.
struct Report<'o> {
    out: &'o mut Vec<ValidationError>,
    kind: EntityKind,
    id: String,
    missing: Vec<String>,
}

impl<'o> Report<'o> {
    fn new(out: &'o mut Vec<ValidationError>, kind: EntityKind, id: &str) -> Self {
        Report {
            out,
            kind,
            id: id.to_string(),
            missing: Vec::new(),
        }
    }

    fn require(&mut self, field: &str, value: &str) -> bool {
        if blank(value) {
            self.missing.push(field.to_string());
            return false;
        }
        true
    }

    fn require_some<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.missing.push(field.to_string());
        }
        value
    }

    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.out.push(ValidationError {
            entity: self.kind,
            entity_id: self.id.clone(),
            field: field.to_string(),
            message: message.into(),
        });
    }

    fn email(&mut self, field: &str, value: &str) {
        if self.require(field, value) && !is_valid_email(value) {
            self.error(field, "invalid email format");
        }
    }

    fn date(&mut self, field: &str, value: &str) {
        if self.require(field, value) && !is_valid_date(value) {
            self.error(field, "must be a YYYY-MM-DD date");
        }
    }

    fn optional_date(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !blank(v)) {
            if !is_valid_date(v) {
                self.error(field, "must be a YYYY-MM-DD date");
            }
        }
    }

    fn optional_time(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !blank(v)) {
            if !is_valid_time(v) {
                self.error(field, "must be a 24-hour HH:MM time");
            }
        }
    }

    /// Both ends optional; the order is checked only when both are valid.
    fn time_range(&mut self, start_field: &str, start: &str, end_field: &str, end: &str) {
        self.optional_time(start_field, Some(start));
        self.optional_time(end_field, Some(end));
        // Zero-padded HH:MM compares correctly as text.
        if is_valid_time(start) && is_valid_time(end) && end <= start {
            self.error(end_field, "endTime must be after startTime");
        }
    }

    fn finish(self) {
        if !self.missing.is_empty() {
            let fields = self.missing.join(", ");
            self.out.push(ValidationError {
                entity: self.kind,
                entity_id: self.id,
                message: format!("missing required fields: {}", fields),
                field: fields,
            });
        }
    }
}

/// Ids present per kind.
struct IdIndex<'a> {
    ids: HashMap<EntityKind, HashSet<&'a str>>,
}

impl<'a> IdIndex<'a> {
    fn build(dataset: &'a Dataset) -> Self {
        let ids = EntityKind::ALL
            .iter()
            .map(|k| (*k, dataset.ids(*k)))
            .collect();
        IdIndex { ids }
    }

    fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.ids.get(&kind).map(|s| s.contains(id)).unwrap_or(false)
    }
}

/// Checks a dataset for admission. Empty result means it may be migrated.
pub fn validate(dataset: &Dataset) -> Vec<ValidationError> {
    let index = IdIndex::build(dataset);
    let tests: HashMap<&str, &Test> = dataset.tests.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut out = duplicate_ids(dataset);
    for rec in dataset.records() {
        check_record(rec, &tests, &mut out);
        check_record_references(rec, &index, &mut out);
    }
    out
}

/// Referential integrity only. Used against committed store state, which
/// carries the system user that datasets never include.
pub fn check_references(dataset: &Dataset) -> Vec<ValidationError> {
    let index = IdIndex::build(dataset);
    let mut out = Vec::new();
    for rec in dataset.records() {
        check_record_references(rec, &index, &mut out);
    }
    out
}

fn check_record_references(rec: Record<'_>, index: &IdIndex<'_>, out: &mut Vec<ValidationError>) {
    for r in rec.references() {
        if !index.contains(r.target, r.id) {
            out.push(ValidationError {
                entity: rec.kind(),
                entity_id: rec.id().to_string(),
                field: r.field.to_string(),
                message: format!("references non-existent {} {:?}", r.target.label(), r.id),
            });
        }
    }
}

fn duplicate_ids(dataset: &Dataset) -> Vec<ValidationError> {
    let mut out = Vec::new();
    for kind in EntityKind::ALL {
        let mut seen = HashSet::new();
        for rec in dataset.batch(kind).records() {
            let id = rec.id();
            if !blank(id) && !seen.insert(id) {
                out.push(ValidationError {
                    entity: kind,
                    entity_id: id.to_string(),
                    field: "id".to_string(),
                    message: "duplicate id".to_string(),
                });
            }
        }
    }
    out
}

fn check_record(rec: Record<'_>, tests: &HashMap<&str, &Test>, out: &mut Vec<ValidationError>) {
    let mut r = Report::new(out, rec.kind(), rec.id());
    r.require("id", rec.id());
    match rec {
        Record::User(u) => check_user(&mut r, u),
        Record::Student(s) => check_student(&mut r, s),
        Record::Class(c) => check_class(&mut r, c),
        Record::ClassEnrollment(e) => check_enrollment(&mut r, e),
        Record::Schedule(s) => check_schedule(&mut r, s),
        Record::ScheduleException(x) => check_schedule_exception(&mut r, x),
        Record::Meeting(m) => check_meeting(&mut r, m),
        Record::AttendanceRecord(a) => check_attendance(&mut r, a),
        Record::ClassNote(n) => check_class_note(&mut r, n),
        Record::Test(t) => check_test(&mut r, t),
        Record::TestResult(t) => check_test_result(&mut r, t, tests),
        Record::HomeworkAssignment(h) => check_assignment(&mut r, h),
        Record::HomeworkSubmission(h) => check_submission(&mut r, h),
    }
    r.finish();
}

fn check_user(r: &mut Report<'_>, u: &User) {
    if u.id == SYSTEM_USER_ID {
        r.error("id", "id is reserved for the system user");
    }
    r.require("name", &u.name);
    r.email("email", &u.email);
}

fn check_student(r: &mut Report<'_>, s: &Student) {
    r.require("name", &s.name);
    r.email("email", &s.email);
}

fn check_class(r: &mut Report<'_>, c: &Class) {
    r.require("name", &c.name);
    if c.capacity <= 0 {
        r.error("capacity", "capacity must be greater than 0");
    }
}

fn check_enrollment(r: &mut Report<'_>, e: &ClassEnrollment) {
    r.require("classId", &e.class_id);
    r.require("studentId", &e.student_id);
}

fn check_schedule(r: &mut Report<'_>, s: &Schedule) {
    r.require("classId", &s.class_id);
    if let Some(day) = r.require_some("dayOfWeek", s.day_of_week) {
        if !(0..=6).contains(&day) {
            r.error("dayOfWeek", "dayOfWeek must be between 0 and 6");
        }
    }
    r.time_range("startTime", &s.start_time, "endTime", &s.end_time);
}

fn check_schedule_exception(r: &mut Report<'_>, x: &ScheduleException) {
    r.require("scheduleId", &x.schedule_id);
    r.date("date", &x.date);
    r.optional_time("startTime", x.start_time.as_deref());
    r.optional_time("endTime", x.end_time.as_deref());
}

fn check_meeting(r: &mut Report<'_>, m: &Meeting) {
    r.require("title", &m.title);
    r.date("date", &m.date);
    r.optional_time("startTime", m.start_time.as_deref());
    r.optional_time("endTime", m.end_time.as_deref());
}

fn check_attendance(r: &mut Report<'_>, a: &AttendanceRecord) {
    r.require("classId", &a.class_id);
    r.date("date", &a.date);
    let mut seen = HashSet::new();
    for (i, e) in a.entries.iter().enumerate() {
        r.require(&format!("entries[{}].studentId", i), &e.student_id);
        r.require_some(&format!("entries[{}].status", i), e.status);
        if !blank(&e.student_id) && !seen.insert(e.student_id.as_str()) {
            r.error(
                &format!("entries[{}].studentId", i),
                "student listed more than once",
            );
        }
    }
}

fn check_class_note(r: &mut Report<'_>, n: &ClassNote) {
    r.require("classId", &n.class_id);
    r.require("content", &n.content);
}

fn check_test(r: &mut Report<'_>, t: &Test) {
    r.require("classId", &t.class_id);
    r.require("title", &t.title);
    r.optional_date("date", t.date.as_deref());
    if let Some(max) = t.max_score {
        if !(max > 0.0) {
            r.error("maxScore", "maxScore must be greater than 0");
        }
    }
}

fn check_test_result(r: &mut Report<'_>, t: &TestResult, tests: &HashMap<&str, &Test>) {
    r.require("testId", &t.test_id);
    r.require("studentId", &t.student_id);
    let Some(score) = r.require_some("score", t.score) else {
        return;
    };
    if !(score >= 0.0) {
        r.error("score", "score must not be negative");
        return;
    }
    let max = tests.get(t.test_id.as_str()).and_then(|test| test.max_score);
    if let Some(max) = max {
        if score > max {
            r.error("score", format!("score exceeds test maxScore {}", max));
        }
    }
}

fn check_assignment(r: &mut Report<'_>, h: &HomeworkAssignment) {
    r.require("classId", &h.class_id);
    r.require("title", &h.title);
    r.optional_date("dueDate", h.due_date.as_deref());
}

fn check_submission(r: &mut Report<'_>, h: &HomeworkSubmission) {
    r.require("assignmentId", &h.assignment_id);
    r.require("studentId", &h.student_id);
    if let Some(g) = h.grade {
        if !(g >= 0.0) {
            r.error("grade", "grade must not be negative");
        }
    }
}
