use super::{ClearOutcome, Store, StoreError};
use crate::model::{
    AttendanceEntry, AttendanceRecord, AttendanceStatus, Batch, Class, ClassEnrollment, ClassNote,
    Counts, Dataset, EntityKind, HomeworkAssignment, HomeworkSubmission, Meeting, Schedule,
    ScheduleException, Student, Test, TestResult, User,
};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DB_FILE: &str = "roster.sqlite3";
const SCHEMA_VERSION: i64 = 1;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the workspace database and make sure the schema exists.
    pub fn open(workspace: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join(DB_FILE))?;
        let store = SqliteStore::from_connection(conn)?;
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = SqliteStore::from_connection(Connection::open_in_memory()?)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Wrap an existing connection without creating any tables.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = &self.conn;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users(
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                role TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS students(
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT,
                grade TEXT,
                parent_contact TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS classes(
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subject TEXT,
                teacher_id TEXT,
                capacity INTEGER NOT NULL,
                room TEXT,
                enrolled_students TEXT NOT NULL DEFAULT '[]',
                FOREIGN KEY(teacher_id) REFERENCES users(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS class_enrollments(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                enrolled_at TEXT,
                FOREIGN KEY(class_id) REFERENCES classes(id),
                FOREIGN KEY(student_id) REFERENCES students(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_class_enrollments_class ON class_enrollments(class_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_class_enrollments_student ON class_enrollments(student_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schedules(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                day_of_week INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                room TEXT,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_schedules_class ON schedules(class_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schedule_exceptions(
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                date TEXT NOT NULL,
                cancelled INTEGER NOT NULL DEFAULT 0,
                start_time TEXT,
                end_time TEXT,
                reason TEXT,
                FOREIGN KEY(schedule_id) REFERENCES schedules(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_schedule_exceptions_schedule ON schedule_exceptions(schedule_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS meetings(
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                class_id TEXT,
                location TEXT,
                notes TEXT,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS attendance_records(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                date TEXT NOT NULL,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS attendance_entries(
                record_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                status TEXT,
                note TEXT,
                PRIMARY KEY(record_id, student_id),
                FOREIGN KEY(record_id) REFERENCES attendance_records(id),
                FOREIGN KEY(student_id) REFERENCES students(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_attendance_records_class ON attendance_records(class_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_attendance_entries_student ON attendance_entries(student_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS class_notes(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tests(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                title TEXT NOT NULL,
                date TEXT,
                max_score REAL,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS test_results(
                id TEXT PRIMARY KEY,
                test_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                score REAL,
                feedback TEXT,
                FOREIGN KEY(test_id) REFERENCES tests(id),
                FOREIGN KEY(student_id) REFERENCES students(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_test_results_test ON test_results(test_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_test_results_student ON test_results(student_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS homework_assignments(
                id TEXT PRIMARY KEY,
                class_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                due_date TEXT,
                FOREIGN KEY(class_id) REFERENCES classes(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS homework_submissions(
                id TEXT PRIMARY KEY,
                assignment_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                submitted_at TEXT,
                status TEXT,
                grade REAL,
                feedback TEXT,
                FOREIGN KEY(assignment_id) REFERENCES homework_assignments(id),
                FOREIGN KEY(student_id) REFERENCES students(id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_homework_submissions_assignment ON homework_submissions(assignment_id)",
            [],
        )?;

        conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?",
                [table],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_users(&self, rows: &[User]) -> Result<(), StoreError> {
        let mut stmt = self
            .conn
            .prepare("INSERT INTO users(id, name, email, role) VALUES(?, ?, ?, ?)")?;
        for u in rows {
            stmt.execute((&u.id, &u.name, &u.email, &u.role))?;
        }
        Ok(())
    }

    fn insert_students(&self, rows: &[Student]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO students(id, name, email, phone, grade, parent_contact)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        for s in rows {
            stmt.execute((&s.id, &s.name, &s.email, &s.phone, &s.grade, &s.parent_contact))?;
        }
        Ok(())
    }

    fn insert_classes(&self, rows: &[Class]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO classes(id, name, subject, teacher_id, capacity, room, enrolled_students)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for c in rows {
            let enrolled = serde_json::to_string(&c.enrolled_students)?;
            stmt.execute((
                &c.id,
                &c.name,
                &c.subject,
                &c.teacher_id,
                c.capacity,
                &c.room,
                &enrolled,
            ))?;
        }
        Ok(())
    }

    fn insert_enrollments(&self, rows: &[ClassEnrollment]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO class_enrollments(id, class_id, student_id, enrolled_at)
             VALUES(?, ?, ?, ?)",
        )?;
        for e in rows {
            stmt.execute((&e.id, &e.class_id, &e.student_id, &e.enrolled_at))?;
        }
        Ok(())
    }

    fn insert_schedules(&self, rows: &[Schedule]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO schedules(id, class_id, day_of_week, start_time, end_time, room)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        for s in rows {
            stmt.execute((
                &s.id,
                &s.class_id,
                s.day_of_week,
                &s.start_time,
                &s.end_time,
                &s.room,
            ))?;
        }
        Ok(())
    }

    fn insert_schedule_exceptions(&self, rows: &[ScheduleException]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO schedule_exceptions(id, schedule_id, date, cancelled, start_time, end_time, reason)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for x in rows {
            stmt.execute((
                &x.id,
                &x.schedule_id,
                &x.date,
                x.cancelled,
                &x.start_time,
                &x.end_time,
                &x.reason,
            ))?;
        }
        Ok(())
    }

    fn insert_meetings(&self, rows: &[Meeting]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO meetings(id, title, date, start_time, end_time, class_id, location, notes)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for m in rows {
            stmt.execute((
                &m.id,
                &m.title,
                &m.date,
                &m.start_time,
                &m.end_time,
                &m.class_id,
                &m.location,
                &m.notes,
            ))?;
        }
        Ok(())
    }

    fn insert_attendance(&self, rows: &[AttendanceRecord]) -> Result<(), StoreError> {
        let mut rec_stmt = self
            .conn
            .prepare("INSERT INTO attendance_records(id, class_id, date) VALUES(?, ?, ?)")?;
        let mut entry_stmt = self.conn.prepare(
            "INSERT INTO attendance_entries(record_id, student_id, status, note)
             VALUES(?, ?, ?, ?)",
        )?;
        for a in rows {
            rec_stmt.execute((&a.id, &a.class_id, &a.date))?;
            for e in &a.entries {
                entry_stmt.execute((
                    &a.id,
                    &e.student_id,
                    e.status.map(|s| s.as_str()),
                    &e.note,
                ))?;
            }
        }
        Ok(())
    }

    fn insert_class_notes(&self, rows: &[ClassNote]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO class_notes(id, class_id, content, created_at) VALUES(?, ?, ?, ?)",
        )?;
        for n in rows {
            stmt.execute((&n.id, &n.class_id, &n.content, &n.created_at))?;
        }
        Ok(())
    }

    fn insert_tests(&self, rows: &[Test]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO tests(id, class_id, title, date, max_score) VALUES(?, ?, ?, ?, ?)",
        )?;
        for t in rows {
            stmt.execute((&t.id, &t.class_id, &t.title, &t.date, t.max_score))?;
        }
        Ok(())
    }

    fn insert_test_results(&self, rows: &[TestResult]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO test_results(id, test_id, student_id, score, feedback)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for r in rows {
            stmt.execute((&r.id, &r.test_id, &r.student_id, r.score, &r.feedback))?;
        }
        Ok(())
    }

    fn insert_assignments(&self, rows: &[HomeworkAssignment]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO homework_assignments(id, class_id, title, description, due_date)
             VALUES(?, ?, ?, ?, ?)",
        )?;
        for h in rows {
            stmt.execute((&h.id, &h.class_id, &h.title, &h.description, &h.due_date))?;
        }
        Ok(())
    }

    fn insert_submissions(&self, rows: &[HomeworkSubmission]) -> Result<(), StoreError> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO homework_submissions(id, assignment_id, student_id, submitted_at, status, grade, feedback)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for h in rows {
            stmt.execute((
                &h.id,
                &h.assignment_id,
                &h.student_id,
                &h.submitted_at,
                &h.status,
                h.grade,
                &h.feedback,
            ))?;
        }
        Ok(())
    }

    fn read_kind(&self, kind: EntityKind, out: &mut Dataset) -> Result<(), StoreError> {
        if !self.table_exists(kind.table())? {
            return Ok(());
        }
        let conn = &self.conn;
        match kind {
            EntityKind::User => {
                let mut stmt = conn.prepare("SELECT id, name, email, role FROM users ORDER BY id")?;
                out.users = stmt
                    .query_map([], |r| {
                        Ok(User {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            email: r.get(2)?,
                            role: r.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::Student => {
                let mut stmt = conn.prepare(
                    "SELECT id, name, email, phone, grade, parent_contact FROM students ORDER BY id",
                )?;
                out.students = stmt
                    .query_map([], |r| {
                        Ok(Student {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            email: r.get(2)?,
                            phone: r.get(3)?,
                            grade: r.get(4)?,
                            parent_contact: r.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::Class => {
                let mut stmt = conn.prepare(
                    "SELECT id, name, subject, teacher_id, capacity, room, enrolled_students
                     FROM classes ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |r| {
                        let enrolled: String = r.get(6)?;
                        Ok((
                            Class {
                                id: r.get(0)?,
                                name: r.get(1)?,
                                subject: r.get(2)?,
                                teacher_id: r.get(3)?,
                                capacity: r.get(4)?,
                                room: r.get(5)?,
                                enrolled_students: Vec::new(),
                            },
                            enrolled,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                let mut classes = Vec::with_capacity(rows.len());
                for (mut c, enrolled) in rows {
                    c.enrolled_students =
                        serde_json::from_str(&enrolled).map_err(|e| StoreError::CorruptRow {
                            table: "classes",
                            message: format!("{}: enrolled_students: {}", c.id, e),
                        })?;
                    classes.push(c);
                }
                out.classes = classes;
            }
            EntityKind::ClassEnrollment => {
                let mut stmt = conn.prepare(
                    "SELECT id, class_id, student_id, enrolled_at FROM class_enrollments ORDER BY id",
                )?;
                out.class_enrollments = stmt
                    .query_map([], |r| {
                        Ok(ClassEnrollment {
                            id: r.get(0)?,
                            class_id: r.get(1)?,
                            student_id: r.get(2)?,
                            enrolled_at: r.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::Schedule => {
                let mut stmt = conn.prepare(
                    "SELECT id, class_id, day_of_week, start_time, end_time, room
                     FROM schedules ORDER BY id",
                )?;
                out.schedules = stmt
                    .query_map([], |r| {
                        Ok(Schedule {
                            id: r.get(0)?,
                            class_id: r.get(1)?,
                            day_of_week: r.get(2)?,
                            start_time: r.get(3)?,
                            end_time: r.get(4)?,
                            room: r.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::ScheduleException => {
                let mut stmt = conn.prepare(
                    "SELECT id, schedule_id, date, cancelled, start_time, end_time, reason
                     FROM schedule_exceptions ORDER BY id",
                )?;
                out.schedule_exceptions = stmt
                    .query_map([], |r| {
                        Ok(ScheduleException {
                            id: r.get(0)?,
                            schedule_id: r.get(1)?,
                            date: r.get(2)?,
                            cancelled: r.get(3)?,
                            start_time: r.get(4)?,
                            end_time: r.get(5)?,
                            reason: r.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::Meeting => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, date, start_time, end_time, class_id, location, notes
                     FROM meetings ORDER BY id",
                )?;
                out.meetings = stmt
                    .query_map([], |r| {
                        Ok(Meeting {
                            id: r.get(0)?,
                            title: r.get(1)?,
                            date: r.get(2)?,
                            start_time: r.get(3)?,
                            end_time: r.get(4)?,
                            class_id: r.get(5)?,
                            location: r.get(6)?,
                            notes: r.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::AttendanceRecord => {
                out.attendance_records = self.read_attendance()?;
            }
            EntityKind::ClassNote => {
                let mut stmt = conn.prepare(
                    "SELECT id, class_id, content, created_at FROM class_notes ORDER BY id",
                )?;
                out.class_notes = stmt
                    .query_map([], |r| {
                        Ok(ClassNote {
                            id: r.get(0)?,
                            class_id: r.get(1)?,
                            content: r.get(2)?,
                            created_at: r.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::Test => {
                let mut stmt = conn.prepare(
                    "SELECT id, class_id, title, date, max_score FROM tests ORDER BY id",
                )?;
                out.tests = stmt
                    .query_map([], |r| {
                        Ok(Test {
                            id: r.get(0)?,
                            class_id: r.get(1)?,
                            title: r.get(2)?,
                            date: r.get(3)?,
                            max_score: r.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::TestResult => {
                let mut stmt = conn.prepare(
                    "SELECT id, test_id, student_id, score, feedback FROM test_results ORDER BY id",
                )?;
                out.test_results = stmt
                    .query_map([], |r| {
                        Ok(TestResult {
                            id: r.get(0)?,
                            test_id: r.get(1)?,
                            student_id: r.get(2)?,
                            score: r.get(3)?,
                            feedback: r.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::HomeworkAssignment => {
                let mut stmt = conn.prepare(
                    "SELECT id, class_id, title, description, due_date
                     FROM homework_assignments ORDER BY id",
                )?;
                out.homework_assignments = stmt
                    .query_map([], |r| {
                        Ok(HomeworkAssignment {
                            id: r.get(0)?,
                            class_id: r.get(1)?,
                            title: r.get(2)?,
                            description: r.get(3)?,
                            due_date: r.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
            EntityKind::HomeworkSubmission => {
                let mut stmt = conn.prepare(
                    "SELECT id, assignment_id, student_id, submitted_at, status, grade, feedback
                     FROM homework_submissions ORDER BY id",
                )?;
                out.homework_submissions = stmt
                    .query_map([], |r| {
                        Ok(HomeworkSubmission {
                            id: r.get(0)?,
                            assignment_id: r.get(1)?,
                            student_id: r.get(2)?,
                            submitted_at: r.get(3)?,
                            status: r.get(4)?,
                            grade: r.get(5)?,
                            feedback: r.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
            }
        }
        Ok(())
    }

    fn read_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut entries: HashMap<String, Vec<AttendanceEntry>> = HashMap::new();
        if self.table_exists("attendance_entries")? {
            let mut stmt = self.conn.prepare(
                "SELECT record_id, student_id, status, note
                 FROM attendance_entries ORDER BY record_id, student_id",
            )?;
            let rows = stmt
                .query_map([], |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (record_id, student_id, status, note) in rows {
                let status = match status {
                    Some(s) => Some(AttendanceStatus::from_str(&s).map_err(|message| {
                        StoreError::CorruptRow {
                            table: "attendance_entries",
                            message,
                        }
                    })?),
                    None => None,
                };
                entries.entry(record_id).or_default().push(AttendanceEntry {
                    student_id,
                    status,
                    note,
                });
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, class_id, date FROM attendance_records ORDER BY id")?;
        let records = stmt
            .query_map([], |r| {
                Ok(AttendanceRecord {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    date: r.get(2)?,
                    entries: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records
            .into_iter()
            .map(|mut rec| {
                rec.entries = entries.remove(&rec.id).unwrap_or_default();
                rec
            })
            .collect())
    }
}

impl Store for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        if !self.conn.is_autocommit() {
            return Err(StoreError::TransactionInProgress);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn clear(&mut self, kind: EntityKind) -> Result<ClearOutcome, StoreError> {
        let table = kind.table();
        if !self.table_exists(table)? {
            return Ok(ClearOutcome::NotInitialized);
        }
        if kind == EntityKind::AttendanceRecord && self.table_exists("attendance_entries")? {
            self.conn.execute("DELETE FROM attendance_entries", [])?;
        }
        let rows = self.conn.execute(&format!("DELETE FROM {}", table), [])?;
        Ok(ClearOutcome::Cleared(rows))
    }

    fn insert(&mut self, batch: Batch<'_>) -> Result<usize, StoreError> {
        match batch {
            Batch::Users(v) => self.insert_users(v)?,
            Batch::Students(v) => self.insert_students(v)?,
            Batch::Classes(v) => self.insert_classes(v)?,
            Batch::ClassEnrollments(v) => self.insert_enrollments(v)?,
            Batch::Schedules(v) => self.insert_schedules(v)?,
            Batch::ScheduleExceptions(v) => self.insert_schedule_exceptions(v)?,
            Batch::Meetings(v) => self.insert_meetings(v)?,
            Batch::AttendanceRecords(v) => self.insert_attendance(v)?,
            Batch::ClassNotes(v) => self.insert_class_notes(v)?,
            Batch::Tests(v) => self.insert_tests(v)?,
            Batch::TestResults(v) => self.insert_test_results(v)?,
            Batch::HomeworkAssignments(v) => self.insert_assignments(v)?,
            Batch::HomeworkSubmissions(v) => self.insert_submissions(v)?,
        }
        Ok(batch.len())
    }

    fn read_all(&self) -> Result<Dataset, StoreError> {
        let mut out = Dataset::default();
        for kind in EntityKind::ALL {
            self.read_kind(kind, &mut out)?;
        }
        Ok(out)
    }

    fn counts(&self) -> Result<Counts, StoreError> {
        let mut counts = Counts::new();
        for kind in EntityKind::ALL {
            let table = kind.table();
            let n: i64 = if self.table_exists(table)? {
                self.conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?
            } else {
                0
            };
            counts.insert(kind, n as usize);
        }
        Ok(counts)
    }

    fn lock_key(&self) -> Option<PathBuf> {
        let path = self.conn.path().filter(|p| !p.is_empty())?;
        std::fs::canonicalize(path).ok()
    }
}
