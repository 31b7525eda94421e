//! Roster entities and the dependency order between them.
//!
//! Every entity refers to others by identifier only. The foreign-key edges are
//! declared once, in [`Record::references`], and the insert/clear orderings in
//! [`FORWARD_ORDER`] / [`REVERSE_ORDER`] are checked against them in tests.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Id of the bootstrap user re-created by every migration.
pub const SYSTEM_USER_ID: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "users")]
    User,
    #[serde(rename = "students")]
    Student,
    #[serde(rename = "classes")]
    Class,
    #[serde(rename = "classEnrollments")]
    ClassEnrollment,
    #[serde(rename = "schedules")]
    Schedule,
    #[serde(rename = "scheduleExceptions")]
    ScheduleException,
    #[serde(rename = "meetings")]
    Meeting,
    #[serde(rename = "attendanceRecords")]
    AttendanceRecord,
    #[serde(rename = "classNotes")]
    ClassNote,
    #[serde(rename = "tests")]
    Test,
    #[serde(rename = "testResults")]
    TestResult,
    #[serde(rename = "homeworkAssignments")]
    HomeworkAssignment,
    #[serde(rename = "homeworkSubmissions")]
    HomeworkSubmission,
}

/// Insert order: parents before children.
pub const FORWARD_ORDER: [EntityKind; 13] = [
    EntityKind::User,
    EntityKind::Student,
    EntityKind::Class,
    EntityKind::ClassEnrollment,
    EntityKind::Schedule,
    EntityKind::ScheduleException,
    EntityKind::Meeting,
    EntityKind::AttendanceRecord,
    EntityKind::ClassNote,
    EntityKind::Test,
    EntityKind::TestResult,
    EntityKind::HomeworkAssignment,
    EntityKind::HomeworkSubmission,
];

/// Clear order: children before parents. The system user goes last.
pub const REVERSE_ORDER: [EntityKind; 13] = [
    EntityKind::HomeworkSubmission,
    EntityKind::HomeworkAssignment,
    EntityKind::TestResult,
    EntityKind::Test,
    EntityKind::ClassNote,
    EntityKind::AttendanceRecord,
    EntityKind::Meeting,
    EntityKind::ScheduleException,
    EntityKind::Schedule,
    EntityKind::ClassEnrollment,
    EntityKind::Class,
    EntityKind::Student,
    EntityKind::User,
];

impl EntityKind {
    pub const ALL: [EntityKind; 13] = FORWARD_ORDER;

    /// Singular name used in validation errors ("schedule", "testResult").
    pub fn entity_name(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Student => "student",
            EntityKind::Class => "class",
            EntityKind::ClassEnrollment => "classEnrollment",
            EntityKind::Schedule => "schedule",
            EntityKind::ScheduleException => "scheduleException",
            EntityKind::Meeting => "meeting",
            EntityKind::AttendanceRecord => "attendanceRecord",
            EntityKind::ClassNote => "classNote",
            EntityKind::Test => "test",
            EntityKind::TestResult => "testResult",
            EntityKind::HomeworkAssignment => "homeworkAssignment",
            EntityKind::HomeworkSubmission => "homeworkSubmission",
        }
    }

    /// Human label used in "references non-existent X" messages.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Student => "student",
            EntityKind::Class => "class",
            EntityKind::ClassEnrollment => "class enrollment",
            EntityKind::Schedule => "schedule",
            EntityKind::ScheduleException => "schedule exception",
            EntityKind::Meeting => "meeting",
            EntityKind::AttendanceRecord => "attendance record",
            EntityKind::ClassNote => "class note",
            EntityKind::Test => "test",
            EntityKind::TestResult => "test result",
            EntityKind::HomeworkAssignment => "homework assignment",
            EntityKind::HomeworkSubmission => "homework submission",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Student => "students",
            EntityKind::Class => "classes",
            EntityKind::ClassEnrollment => "class_enrollments",
            EntityKind::Schedule => "schedules",
            EntityKind::ScheduleException => "schedule_exceptions",
            EntityKind::Meeting => "meetings",
            EntityKind::AttendanceRecord => "attendance_records",
            EntityKind::ClassNote => "class_notes",
            EntityKind::Test => "tests",
            EntityKind::TestResult => "test_results",
            EntityKind::HomeworkAssignment => "homework_assignments",
            EntityKind::HomeworkSubmission => "homework_submissions",
        }
    }

    /// Kinds this kind may reference.
    pub fn parents(self) -> &'static [EntityKind] {
        match self {
            EntityKind::User | EntityKind::Student => &[],
            EntityKind::Class => &[EntityKind::User, EntityKind::Student],
            EntityKind::ClassEnrollment => &[EntityKind::Class, EntityKind::Student],
            EntityKind::Schedule => &[EntityKind::Class],
            EntityKind::ScheduleException => &[EntityKind::Schedule],
            EntityKind::Meeting => &[EntityKind::Class],
            EntityKind::AttendanceRecord => &[EntityKind::Class, EntityKind::Student],
            EntityKind::ClassNote => &[EntityKind::Class],
            EntityKind::Test => &[EntityKind::Class],
            EntityKind::TestResult => &[EntityKind::Test, EntityKind::Student],
            EntityKind::HomeworkAssignment => &[EntityKind::Class],
            EntityKind::HomeworkSubmission => {
                &[EntityKind::HomeworkAssignment, EntityKind::Student]
            }
        }
    }

    /// Kinds that reference this kind.
    pub fn children(self) -> Vec<EntityKind> {
        EntityKind::ALL
            .iter()
            .copied()
            .filter(|k| k.parents().contains(&self))
            .collect()
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entity_name())
    }
}

pub type Counts = BTreeMap<EntityKind, usize>;

pub fn zero_counts() -> Counts {
    EntityKind::ALL.iter().map(|k| (*k, 0)).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Option<String>,
}

impl User {
    pub fn system() -> Self {
        User {
            id: SYSTEM_USER_ID.to_string(),
            name: "System".to_string(),
            email: "system@localhost.local".to_string(),
            role: Some("system".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub grade: Option<String>,
    pub parent_contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub subject: Option<String>,
    pub teacher_id: Option<String>,
    pub capacity: i64,
    pub room: Option<String>,
    pub enrolled_students: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassEnrollment {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub enrolled_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub class_id: String,
    pub day_of_week: Option<i64>,
    pub start_time: String,
    pub end_time: String,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleException {
    pub id: String,
    pub schedule_id: String,
    pub date: String,
    pub cancelled: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub title: String,
    pub date: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub class_id: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(format!("unknown attendance status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttendanceEntry {
    pub student_id: String,
    pub status: Option<AttendanceStatus>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub class_id: String,
    pub date: String,
    pub entries: Vec<AttendanceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassNote {
    pub id: String,
    pub class_id: String,
    pub content: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub class_id: String,
    pub title: String,
    pub date: Option<String>,
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HomeworkAssignment {
    pub id: String,
    pub class_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HomeworkSubmission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub submitted_at: Option<String>,
    pub status: Option<String>,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
}

/// The complete set of collections migrated in one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dataset {
    pub users: Vec<User>,
    pub students: Vec<Student>,
    pub classes: Vec<Class>,
    pub class_enrollments: Vec<ClassEnrollment>,
    pub schedules: Vec<Schedule>,
    pub schedule_exceptions: Vec<ScheduleException>,
    pub meetings: Vec<Meeting>,
    pub attendance_records: Vec<AttendanceRecord>,
    pub class_notes: Vec<ClassNote>,
    pub tests: Vec<Test>,
    pub test_results: Vec<TestResult>,
    pub homework_assignments: Vec<HomeworkAssignment>,
    pub homework_submissions: Vec<HomeworkSubmission>,
}

impl Dataset {
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn batch(&self, kind: EntityKind) -> Batch<'_> {
        match kind {
            EntityKind::User => Batch::Users(&self.users),
            EntityKind::Student => Batch::Students(&self.students),
            EntityKind::Class => Batch::Classes(&self.classes),
            EntityKind::ClassEnrollment => Batch::ClassEnrollments(&self.class_enrollments),
            EntityKind::Schedule => Batch::Schedules(&self.schedules),
            EntityKind::ScheduleException => Batch::ScheduleExceptions(&self.schedule_exceptions),
            EntityKind::Meeting => Batch::Meetings(&self.meetings),
            EntityKind::AttendanceRecord => Batch::AttendanceRecords(&self.attendance_records),
            EntityKind::ClassNote => Batch::ClassNotes(&self.class_notes),
            EntityKind::Test => Batch::Tests(&self.tests),
            EntityKind::TestResult => Batch::TestResults(&self.test_results),
            EntityKind::HomeworkAssignment => {
                Batch::HomeworkAssignments(&self.homework_assignments)
            }
            EntityKind::HomeworkSubmission => {
                Batch::HomeworkSubmissions(&self.homework_submissions)
            }
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.batch(kind).len()
    }

    pub fn is_empty(&self) -> bool {
        EntityKind::ALL.iter().all(|k| self.len(*k) == 0)
    }

    pub fn counts(&self) -> Counts {
        EntityKind::ALL.iter().map(|k| (*k, self.len(*k))).collect()
    }

    /// Every record, in forward dependency order.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        FORWARD_ORDER
            .into_iter()
            .flat_map(move |k| self.batch(k).records())
    }

    pub fn ids(&self, kind: EntityKind) -> HashSet<&str> {
        self.batch(kind).records().into_iter().map(|r| r.id()).collect()
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.batch(kind).records().iter().any(|r| r.id() == id)
    }

    pub fn clear_kind(&mut self, kind: EntityKind) -> usize {
        let n = self.len(kind);
        match kind {
            EntityKind::User => self.users.clear(),
            EntityKind::Student => self.students.clear(),
            EntityKind::Class => self.classes.clear(),
            EntityKind::ClassEnrollment => self.class_enrollments.clear(),
            EntityKind::Schedule => self.schedules.clear(),
            EntityKind::ScheduleException => self.schedule_exceptions.clear(),
            EntityKind::Meeting => self.meetings.clear(),
            EntityKind::AttendanceRecord => self.attendance_records.clear(),
            EntityKind::ClassNote => self.class_notes.clear(),
            EntityKind::Test => self.tests.clear(),
            EntityKind::TestResult => self.test_results.clear(),
            EntityKind::HomeworkAssignment => self.homework_assignments.clear(),
            EntityKind::HomeworkSubmission => self.homework_submissions.clear(),
        }
        n
    }

    pub fn extend(&mut self, batch: Batch<'_>) {
        match batch {
            Batch::Users(v) => self.users.extend_from_slice(v),
            Batch::Students(v) => self.students.extend_from_slice(v),
            Batch::Classes(v) => self.classes.extend_from_slice(v),
            Batch::ClassEnrollments(v) => self.class_enrollments.extend_from_slice(v),
            Batch::Schedules(v) => self.schedules.extend_from_slice(v),
            Batch::ScheduleExceptions(v) => self.schedule_exceptions.extend_from_slice(v),
            Batch::Meetings(v) => self.meetings.extend_from_slice(v),
            Batch::AttendanceRecords(v) => self.attendance_records.extend_from_slice(v),
            Batch::ClassNotes(v) => self.class_notes.extend_from_slice(v),
            Batch::Tests(v) => self.tests.extend_from_slice(v),
            Batch::TestResults(v) => self.test_results.extend_from_slice(v),
            Batch::HomeworkAssignments(v) => self.homework_assignments.extend_from_slice(v),
            Batch::HomeworkSubmissions(v) => self.homework_submissions.extend_from_slice(v),
        }
    }

    /// Sort every collection by id so two snapshots of the same state
    /// serialize to the same bytes.
    pub fn sort_canonical(&mut self) {
        self.users.sort_by(|a, b| a.id.cmp(&b.id));
        self.students.sort_by(|a, b| a.id.cmp(&b.id));
        self.classes.sort_by(|a, b| a.id.cmp(&b.id));
        self.class_enrollments.sort_by(|a, b| a.id.cmp(&b.id));
        self.schedules.sort_by(|a, b| a.id.cmp(&b.id));
        self.schedule_exceptions.sort_by(|a, b| a.id.cmp(&b.id));
        self.meetings.sort_by(|a, b| a.id.cmp(&b.id));
        self.attendance_records.sort_by(|a, b| a.id.cmp(&b.id));
        for rec in &mut self.attendance_records {
            rec.entries.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        }
        self.class_notes.sort_by(|a, b| a.id.cmp(&b.id));
        self.tests.sort_by(|a, b| a.id.cmp(&b.id));
        self.test_results.sort_by(|a, b| a.id.cmp(&b.id));
        self.homework_assignments.sort_by(|a, b| a.id.cmp(&b.id));
        self.homework_submissions.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// All rows of one entity kind, borrowed from a [`Dataset`].
#[derive(Debug, Clone, Copy)]
pub enum Batch<'a> {
    Users(&'a [User]),
    Students(&'a [Student]),
    Classes(&'a [Class]),
    ClassEnrollments(&'a [ClassEnrollment]),
    Schedules(&'a [Schedule]),
    ScheduleExceptions(&'a [ScheduleException]),
    Meetings(&'a [Meeting]),
    AttendanceRecords(&'a [AttendanceRecord]),
    ClassNotes(&'a [ClassNote]),
    Tests(&'a [Test]),
    TestResults(&'a [TestResult]),
    HomeworkAssignments(&'a [HomeworkAssignment]),
    HomeworkSubmissions(&'a [HomeworkSubmission]),
}

impl<'a> Batch<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Batch::Users(_) => EntityKind::User,
            Batch::Students(_) => EntityKind::Student,
            Batch::Classes(_) => EntityKind::Class,
            Batch::ClassEnrollments(_) => EntityKind::ClassEnrollment,
            Batch::Schedules(_) => EntityKind::Schedule,
            Batch::ScheduleExceptions(_) => EntityKind::ScheduleException,
            Batch::Meetings(_) => EntityKind::Meeting,
            Batch::AttendanceRecords(_) => EntityKind::AttendanceRecord,
            Batch::ClassNotes(_) => EntityKind::ClassNote,
            Batch::Tests(_) => EntityKind::Test,
            Batch::TestResults(_) => EntityKind::TestResult,
            Batch::HomeworkAssignments(_) => EntityKind::HomeworkAssignment,
            Batch::HomeworkSubmissions(_) => EntityKind::HomeworkSubmission,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Users(v) => v.len(),
            Batch::Students(v) => v.len(),
            Batch::Classes(v) => v.len(),
            Batch::ClassEnrollments(v) => v.len(),
            Batch::Schedules(v) => v.len(),
            Batch::ScheduleExceptions(v) => v.len(),
            Batch::Meetings(v) => v.len(),
            Batch::AttendanceRecords(v) => v.len(),
            Batch::ClassNotes(v) => v.len(),
            Batch::Tests(v) => v.len(),
            Batch::TestResults(v) => v.len(),
            Batch::HomeworkAssignments(v) => v.len(),
            Batch::HomeworkSubmissions(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<Record<'a>> {
        match *self {
            Batch::Users(v) => v.iter().map(Record::User).collect(),
            Batch::Students(v) => v.iter().map(Record::Student).collect(),
            Batch::Classes(v) => v.iter().map(Record::Class).collect(),
            Batch::ClassEnrollments(v) => v.iter().map(Record::ClassEnrollment).collect(),
            Batch::Schedules(v) => v.iter().map(Record::Schedule).collect(),
            Batch::ScheduleExceptions(v) => v.iter().map(Record::ScheduleException).collect(),
            Batch::Meetings(v) => v.iter().map(Record::Meeting).collect(),
            Batch::AttendanceRecords(v) => v.iter().map(Record::AttendanceRecord).collect(),
            Batch::ClassNotes(v) => v.iter().map(Record::ClassNote).collect(),
            Batch::Tests(v) => v.iter().map(Record::Test).collect(),
            Batch::TestResults(v) => v.iter().map(Record::TestResult).collect(),
            Batch::HomeworkAssignments(v) => v.iter().map(Record::HomeworkAssignment).collect(),
            Batch::HomeworkSubmissions(v) => v.iter().map(Record::HomeworkSubmission).collect(),
        }
    }
}

/// One entity instance of any kind.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    User(&'a User),
    Student(&'a Student),
    Class(&'a Class),
    ClassEnrollment(&'a ClassEnrollment),
    Schedule(&'a Schedule),
    ScheduleException(&'a ScheduleException),
    Meeting(&'a Meeting),
    AttendanceRecord(&'a AttendanceRecord),
    ClassNote(&'a ClassNote),
    Test(&'a Test),
    TestResult(&'a TestResult),
    HomeworkAssignment(&'a HomeworkAssignment),
    HomeworkSubmission(&'a HomeworkSubmission),
}

/// A foreign identifier held by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    pub field: &'static str,
    pub target: EntityKind,
    pub id: &'a str,
}

impl<'a> Record<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::User(_) => EntityKind::User,
            Record::Student(_) => EntityKind::Student,
            Record::Class(_) => EntityKind::Class,
            Record::ClassEnrollment(_) => EntityKind::ClassEnrollment,
            Record::Schedule(_) => EntityKind::Schedule,
            Record::ScheduleException(_) => EntityKind::ScheduleException,
            Record::Meeting(_) => EntityKind::Meeting,
            Record::AttendanceRecord(_) => EntityKind::AttendanceRecord,
            Record::ClassNote(_) => EntityKind::ClassNote,
            Record::Test(_) => EntityKind::Test,
            Record::TestResult(_) => EntityKind::TestResult,
            Record::HomeworkAssignment(_) => EntityKind::HomeworkAssignment,
            Record::HomeworkSubmission(_) => EntityKind::HomeworkSubmission,
        }
    }

    pub fn id(&self) -> &'a str {
        match *self {
            Record::User(r) => &r.id,
            Record::Student(r) => &r.id,
            Record::Class(r) => &r.id,
            Record::ClassEnrollment(r) => &r.id,
            Record::Schedule(r) => &r.id,
            Record::ScheduleException(r) => &r.id,
            Record::Meeting(r) => &r.id,
            Record::AttendanceRecord(r) => &r.id,
            Record::ClassNote(r) => &r.id,
            Record::Test(r) => &r.id,
            Record::TestResult(r) => &r.id,
            Record::HomeworkAssignment(r) => &r.id,
            Record::HomeworkSubmission(r) => &r.id,
        }
    }

    /// Foreign identifiers this record holds. Empty or absent ids are skipped;
    /// presence is the validator's concern.
    pub fn references(&self) -> Vec<Reference<'a>> {
        let mut out = Vec::new();
        let mut push = |field: &'static str, target: EntityKind, id: &'a str| {
            if !id.trim().is_empty() {
                out.push(Reference { field, target, id });
            }
        };
        match *self {
            Record::User(_) | Record::Student(_) => {}
            Record::Class(r) => {
                if let Some(t) = r.teacher_id.as_deref() {
                    push("teacherId", EntityKind::User, t);
                }
                for sid in &r.enrolled_students {
                    push("enrolledStudents", EntityKind::Student, sid.as_str());
                }
            }
            Record::ClassEnrollment(r) => {
                push("classId", EntityKind::Class, r.class_id.as_str());
                push("studentId", EntityKind::Student, r.student_id.as_str());
            }
            Record::Schedule(r) => push("classId", EntityKind::Class, r.class_id.as_str()),
            Record::ScheduleException(r) => {
                push("scheduleId", EntityKind::Schedule, r.schedule_id.as_str())
            }
            Record::Meeting(r) => {
                if let Some(c) = r.class_id.as_deref() {
                    push("classId", EntityKind::Class, c);
                }
            }
            Record::AttendanceRecord(r) => {
                push("classId", EntityKind::Class, r.class_id.as_str());
                for e in &r.entries {
                    push("entries.studentId", EntityKind::Student, e.student_id.as_str());
                }
            }
            Record::ClassNote(r) => push("classId", EntityKind::Class, r.class_id.as_str()),
            Record::Test(r) => push("classId", EntityKind::Class, r.class_id.as_str()),
            Record::TestResult(r) => {
                push("testId", EntityKind::Test, r.test_id.as_str());
                push("studentId", EntityKind::Student, r.student_id.as_str());
            }
            Record::HomeworkAssignment(r) => push("classId", EntityKind::Class, r.class_id.as_str()),
            Record::HomeworkSubmission(r) => {
                push("assignmentId", EntityKind::HomeworkAssignment, r.assignment_id.as_str());
                push("studentId", EntityKind::Student, r.student_id.as_str());
            }
        }
        out
    }
}
