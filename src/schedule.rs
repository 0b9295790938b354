//! Schedule bookings: draft validation, double-booking detection and the
//! recurrence calendar. Nothing in here touches the database.

use crate::validation::FieldError;
use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

pub const TIME_FORMAT: &str = "%H:%M";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchoolDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl SchoolDay {
    pub const ALL: [SchoolDay; 6] = [
        SchoolDay::Monday,
        SchoolDay::Tuesday,
        SchoolDay::Wednesday,
        SchoolDay::Thursday,
        SchoolDay::Friday,
        SchoolDay::Saturday,
    ];

    pub fn parse(raw: &str) -> Option<SchoolDay> {
        match raw.trim().to_lowercase().as_str() {
            "monday" | "segunda" | "segunda-feira" => Some(SchoolDay::Monday),
            "tuesday" | "terça" | "terca" | "terça-feira" | "terca-feira" => {
                Some(SchoolDay::Tuesday)
            }
            "wednesday" | "quarta" | "quarta-feira" => Some(SchoolDay::Wednesday),
            "thursday" | "quinta" | "quinta-feira" => Some(SchoolDay::Thursday),
            "friday" | "sexta" | "sexta-feira" => Some(SchoolDay::Friday),
            "saturday" | "sábado" | "sabado" => Some(SchoolDay::Saturday),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            SchoolDay::Monday => "monday",
            SchoolDay::Tuesday => "tuesday",
            SchoolDay::Wednesday => "wednesday",
            SchoolDay::Thursday => "thursday",
            SchoolDay::Friday => "friday",
            SchoolDay::Saturday => "saturday",
        }
    }

    pub fn from_weekday(w: Weekday) -> Option<SchoolDay> {
        match w {
            Weekday::Mon => Some(SchoolDay::Monday),
            Weekday::Tue => Some(SchoolDay::Tuesday),
            Weekday::Wed => Some(SchoolDay::Wednesday),
            Weekday::Thu => Some(SchoolDay::Thursday),
            Weekday::Fri => Some(SchoolDay::Friday),
            Weekday::Sat => Some(SchoolDay::Saturday),
            Weekday::Sun => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    Weekly,
    Biweekly,
    Monthly,
}

impl Recurrence {
    pub fn parse(raw: &str) -> Option<Recurrence> {
        match raw.trim().to_lowercase().as_str() {
            "weekly" | "semanal" => Some(Recurrence::Weekly),
            "biweekly" | "quinzenal" => Some(Recurrence::Biweekly),
            "monthly" | "mensal" => Some(Recurrence::Monthly),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Recurrence::Weekly => "weekly",
            Recurrence::Biweekly => "biweekly",
            Recurrence::Monthly => "monthly",
        }
    }
}

/// School-hours window and slot size used by validation and the slot grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchoolHours {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub slot_minutes: i64,
}

impl Default for SchoolHours {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            day_end: NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default(),
            slot_minutes: 30,
        }
    }
}

impl SchoolHours {
    /// Slot boundaries from `day_start` to `day_end` inclusive, e.g. 07:00, 07:30 ... 23:00.
    pub fn time_slots(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.slot_minutes <= 0 {
            return out;
        }
        let step = Duration::minutes(self.slot_minutes);
        let mut t = self.day_start;
        while t <= self.day_end {
            out.push(t.format(TIME_FORMAT).to_string());
            let (next, wrapped) = t.overflowing_add_signed(step);
            if wrapped != 0 || next <= t {
                break;
            }
            t = next;
        }
        out
    }
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn times_overlap(
    a_start: NaiveTime,
    a_end: NaiveTime,
    b_start: NaiveTime,
    b_end: NaiveTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Date ranges are inclusive on both ends.
pub fn dates_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// A booking as submitted by the form, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleDraft {
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub room_id: String,
    pub class_id: String,
    pub start_date: String,
    pub end_date: String,
    pub recurrence: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub room_id: String,
    pub class_id: String,
    pub days: Vec<SchoolDay>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub recurrence: Recurrence,
}

impl Booking {
    pub fn time_range(&self) -> String {
        format!(
            "{}-{}",
            self.start_time.format(TIME_FORMAT),
            self.end_time.format(TIME_FORMAT)
        )
    }

    pub fn minutes_per_session(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }

    /// Whether a session of this booking takes place on `date`.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        if date < self.start_date || date > self.end_date {
            return false;
        }
        let Some(day) = SchoolDay::from_weekday(date.weekday()) else {
            return false;
        };
        if !self.days.contains(&day) {
            return false;
        }
        match self.recurrence {
            Recurrence::Weekly => true,
            Recurrence::Biweekly => {
                let anchor = week_start(self.start_date);
                let weeks = (week_start(date) - anchor).num_days() / 7;
                weeks % 2 == 0
            }
            Recurrence::Monthly => week_of_month(date) == week_of_month(self.start_date),
        }
    }
}

fn week_start(d: NaiveDate) -> NaiveDate {
    d - Duration::days(i64::from(d.weekday().num_days_from_monday()))
}

fn week_of_month(d: NaiveDate) -> u32 {
    (d.day() - 1) / 7
}

impl ScheduleDraft {
    /// Checks every field and returns all problems at once; on success the
    /// booking carries the given `id`.
    pub fn validate(&self, id: &str, hours: &SchoolHours) -> Result<Booking, Vec<FieldError>> {
        let mut errors = Vec::new();

        let mut days = Vec::new();
        for raw in &self.days {
            match SchoolDay::parse(raw) {
                Some(d) => {
                    if !days.contains(&d) {
                        days.push(d);
                    }
                }
                None => errors.push(FieldError::new("days", format!("unknown weekday: {}", raw))),
            }
        }
        days.sort();
        if self.days.is_empty() {
            errors.push(FieldError::new("days", "select at least one weekday"));
        }

        let start_time = required_time(&self.start_time, "startTime", "start time", &mut errors);
        let end_time = required_time(&self.end_time, "endTime", "end time", &mut errors);

        for (value, field, label) in [
            (&self.subject_id, "subjectId", "subject"),
            (&self.teacher_id, "teacherId", "teacher"),
            (&self.room_id, "roomId", "room"),
            (&self.class_id, "classId", "class"),
        ] {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, format!("select the {}", label)));
            }
        }

        let start_date = required_date(&self.start_date, "startDate", "start date", &mut errors);
        let end_date = required_date(&self.end_date, "endDate", "end date", &mut errors);

        if let (Some(s), Some(e)) = (start_time, end_time) {
            if s >= e {
                errors.push(FieldError::new(
                    "endTime",
                    "start time must be earlier than end time",
                ));
            }
            if s < hours.day_start || e > hours.day_end {
                errors.push(FieldError::new(
                    "startTime",
                    format!(
                        "times must be between {} and {}",
                        hours.day_start.format(TIME_FORMAT),
                        hours.day_end.format(TIME_FORMAT)
                    ),
                ));
            }
        }

        if let (Some(s), Some(e)) = (start_date, end_date) {
            if s > e {
                errors.push(FieldError::new(
                    "endDate",
                    "start date must not be after end date",
                ));
            }
        }

        let recurrence = match self.recurrence.as_deref().map(str::trim) {
            None | Some("") => Some(Recurrence::default()),
            Some(raw) => {
                let r = Recurrence::parse(raw);
                if r.is_none() {
                    errors.push(FieldError::new(
                        "recurrence",
                        "recurrence must be one of: weekly, biweekly, monthly",
                    ));
                }
                r
            }
        };

        if !errors.is_empty() {
            return Err(errors);
        }
        match (start_time, end_time, start_date, end_date, recurrence) {
            (Some(start_time), Some(end_time), Some(start_date), Some(end_date), Some(recurrence)) => {
                Ok(Booking {
                    id: id.to_string(),
                    subject_id: self.subject_id.trim().to_string(),
                    teacher_id: self.teacher_id.trim().to_string(),
                    room_id: self.room_id.trim().to_string(),
                    class_id: self.class_id.trim().to_string(),
                    days,
                    start_time,
                    end_time,
                    start_date,
                    end_date,
                    recurrence,
                })
            }
            _ => Err(errors),
        }
    }
}

fn required_time(
    raw: &str,
    field: &str,
    label: &str,
    errors: &mut Vec<FieldError>,
) -> Option<NaiveTime> {
    if raw.trim().is_empty() {
        errors.push(FieldError::new(field, format!("{} is required", label)));
        return None;
    }
    let t = parse_time(raw);
    if t.is_none() {
        errors.push(FieldError::new(field, format!("{} must be HH:MM", label)));
    }
    t
}

fn required_date(
    raw: &str,
    field: &str,
    label: &str,
    errors: &mut Vec<FieldError>,
) -> Option<NaiveDate> {
    if raw.trim().is_empty() {
        errors.push(FieldError::new(field, format!("{} is required", label)));
        return None;
    }
    let d = parse_date(raw);
    if d.is_none() {
        errors.push(FieldError::new(field, format!("{} must be YYYY-MM-DD", label)));
    }
    d
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Teacher,
    Room,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub day: SchoolDay,
    pub schedule_id: String,
    pub time_range: String,
}

fn clashes(candidate: &Booking, other: &Booking, day: SchoolDay) -> bool {
    other.id != candidate.id
        && other.days.contains(&day)
        && times_overlap(
            other.start_time,
            other.end_time,
            candidate.start_time,
            candidate.end_time,
        )
        && dates_overlap(
            other.start_date,
            other.end_date,
            candidate.start_date,
            candidate.end_date,
        )
}

/// Reports at most one teacher clash and one room clash per weekday of the
/// candidate. Bookings sharing the candidate's id are skipped so an edit never
/// conflicts with its previous version.
pub fn find_conflicts(candidate: &Booking, existing: &[Booking]) -> Vec<Conflict> {
    let mut out = Vec::new();
    for &day in &candidate.days {
        if let Some(other) = existing
            .iter()
            .find(|s| s.teacher_id == candidate.teacher_id && clashes(candidate, s, day))
        {
            out.push(Conflict {
                kind: ConflictKind::Teacher,
                day,
                schedule_id: other.id.clone(),
                time_range: other.time_range(),
            });
        }
        if let Some(other) = existing
            .iter()
            .find(|s| s.room_id == candidate.room_id && clashes(candidate, s, day))
        {
            out.push(Conflict {
                kind: ConflictKind::Room,
                day,
                schedule_id: other.id.clone(),
                time_range: other.time_range(),
            });
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Ongoing,
    Upcoming,
}

pub fn session_status(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> SessionStatus {
    if now >= end {
        SessionStatus::Completed
    } else if now >= start {
        SessionStatus::Ongoing
    } else {
        SessionStatus::Upcoming
    }
}

/// `"{h}h {m}m"` as shown on the student dashboard.
pub fn format_time_left(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> NaiveTime {
        parse_time(raw).expect("time")
    }

    fn d(raw: &str) -> NaiveDate {
        parse_date(raw).expect("date")
    }

    fn draft(days: &[&str], start: &str, end: &str) -> ScheduleDraft {
        ScheduleDraft {
            days: days.iter().map(|s| s.to_string()).collect(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            subject_id: "web".to_string(),
            teacher_id: "joao".to_string(),
            room_id: "lab01".to_string(),
            class_id: "turma-a".to_string(),
            start_date: "2024-01-15".to_string(),
            end_date: "2024-06-15".to_string(),
            recurrence: None,
        }
    }

    fn booking(id: &str, days: &[&str], start: &str, end: &str) -> Booking {
        draft(days, start, end)
            .validate(id, &SchoolHours::default())
            .expect("valid booking")
    }

    #[test]
    fn overlap_is_strict_at_the_edges() {
        assert!(times_overlap(t("08:00"), t("10:00"), t("09:00"), t("11:00")));
        assert!(times_overlap(t("08:00"), t("10:00"), t("08:30"), t("09:30")));
        assert!(!times_overlap(t("08:00"), t("10:00"), t("10:00"), t("12:00")));
        assert!(!times_overlap(t("10:00"), t("12:00"), t("08:00"), t("10:00")));
    }

    #[test]
    fn validate_accepts_portuguese_days_and_recurrence() {
        let mut dr = draft(&["quarta", "segunda", "segunda"], "08:00", "10:00");
        dr.recurrence = Some("quinzenal".to_string());
        let b = dr.validate("s1", &SchoolHours::default()).expect("valid");
        assert_eq!(b.days, vec![SchoolDay::Monday, SchoolDay::Wednesday]);
        assert_eq!(b.recurrence, Recurrence::Biweekly);
        assert_eq!(b.minutes_per_session(), 120);
    }

    #[test]
    fn validate_collects_all_errors() {
        let dr = ScheduleDraft::default();
        let errors = dr
            .validate("x", &SchoolHours::default())
            .expect_err("empty draft");
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "days",
                "startTime",
                "endTime",
                "subjectId",
                "teacherId",
                "roomId",
                "classId",
                "startDate",
                "endDate"
            ]
        );
    }

    #[test]
    fn validate_rejects_inverted_and_out_of_hours_ranges() {
        let errors = draft(&["monday"], "10:00", "08:00")
            .validate("x", &SchoolHours::default())
            .expect_err("inverted");
        assert!(errors.iter().any(|e| e.message.contains("earlier than")));

        let errors = draft(&["monday"], "06:30", "08:00")
            .validate("x", &SchoolHours::default())
            .expect_err("too early");
        assert!(errors.iter().any(|e| e.message.contains("between 07:00 and 23:00")));

        let mut dr = draft(&["monday"], "08:00", "10:00");
        dr.start_date = "2024-07-01".to_string();
        let errors = dr
            .validate("x", &SchoolHours::default())
            .expect_err("dates inverted");
        assert_eq!(errors[0].field, "endDate");
    }

    #[test]
    fn teacher_and_room_conflicts_on_shared_days() {
        let existing = vec![booking("a", &["monday", "wednesday"], "08:00", "10:00")];
        let candidate = booking("b", &["wednesday", "friday"], "09:00", "11:00");
        let conflicts = find_conflicts(&candidate, &existing);
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].kind, ConflictKind::Teacher);
        assert_eq!(conflicts[1].kind, ConflictKind::Room);
        assert!(conflicts.iter().all(|c| c.day == SchoolDay::Wednesday));
        assert_eq!(conflicts[0].schedule_id, "a");
        assert_eq!(conflicts[0].time_range, "08:00-10:00");
    }

    #[test]
    fn different_teacher_and_room_do_not_conflict() {
        let mut other = booking("a", &["monday"], "08:00", "10:00");
        other.teacher_id = "maria".to_string();
        other.room_id = "lab02".to_string();
        let candidate = booking("b", &["monday"], "08:00", "10:00");
        assert!(find_conflicts(&candidate, &[other]).is_empty());
    }

    #[test]
    fn editing_skips_itself_and_disjoint_terms() {
        let mut existing = booking("a", &["monday"], "08:00", "10:00");
        let edited = booking("a", &["monday"], "09:00", "11:00");
        assert!(find_conflicts(&edited, std::slice::from_ref(&existing)).is_empty());

        existing.id = "z".to_string();
        existing.start_date = d("2023-01-01");
        existing.end_date = d("2023-12-31");
        assert!(find_conflicts(&edited, &[existing]).is_empty());
    }

    #[test]
    fn recurrence_calendar() {
        // 2024-01-15 is a Monday.
        let mut b = booking("a", &["monday"], "08:00", "10:00");
        assert!(b.occurs_on(d("2024-01-22")));
        assert!(!b.occurs_on(d("2024-01-23")));
        assert!(!b.occurs_on(d("2024-01-08")));

        b.recurrence = Recurrence::Biweekly;
        assert!(b.occurs_on(d("2024-01-29")));
        assert!(!b.occurs_on(d("2024-01-22")));

        b.recurrence = Recurrence::Monthly;
        // third Monday of February 2024 is the 19th (days 15..=21).
        assert!(b.occurs_on(d("2024-02-19")));
        assert!(!b.occurs_on(d("2024-02-12")));
    }

    #[test]
    fn slot_grid_and_status() {
        let slots = SchoolHours::default().time_slots();
        assert_eq!(slots.first().map(String::as_str), Some("07:00"));
        assert_eq!(slots.last().map(String::as_str), Some("23:00"));
        assert_eq!(slots.len(), 33);

        assert_eq!(session_status(t("08:00"), t("10:00"), t("07:59")), SessionStatus::Upcoming);
        assert_eq!(session_status(t("08:00"), t("10:00"), t("08:00")), SessionStatus::Ongoing);
        assert_eq!(session_status(t("08:00"), t("10:00"), t("10:00")), SessionStatus::Completed);
        assert_eq!(format_time_left(135), "2h 15m");
    }
}
