//! Default records supplied when a collection has never been written

use crate::domain::records::{
    Notification, NotificationType, Tour, TourStatus, TrainingRole, TrainingSession,
    TrainingStatus,
};
use crate::domain::types::{Coordinate, Site};
use chrono::{Duration, Local, NaiveTime, TimeZone, Utc};

/// Today at `hour:00` local time, as an RFC 3339 UTC string
fn today_at(hour: u32) -> String {
    let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or_default();
    let local = Local::now().date_naive().and_time(time);
    Local
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

fn days_from_now(days: i64) -> String {
    (Utc::now() + Duration::days(days)).to_rfc3339()
}

fn tour(id: &str, project_id: &str, project: &str, task: &str, from: &str, to: &str) -> Tour {
    Tour {
        id: id.to_string(),
        project_id: project_id.to_string(),
        project_name: project.to_string(),
        task_name: task.to_string(),
        task_description: None,
        from_location: from.to_string(),
        to_location: to.to_string(),
        to_coordinates: Coordinate::UNSET,
        start_date: today_at(8),
        end_date: today_at(18),
        status: TourStatus::Upcoming,
        advance_amount: None,
        tour_phase: None,
        actual_start_date: None,
        site_arrival_time: None,
        return_start_time: None,
        actual_end_date: None,
        transport_mode: None,
        travel_type: None,
        pool_role: None,
        vehicle_plate_url: None,
        start_selfie_url: None,
        site_arrival_selfie_url: None,
        return_start_selfie_url: None,
        end_selfie_url: None,
        checkpoint_coordinates: Vec::new(),
        distance_covered: None,
        weather_data: None,
        claim_status: None,
        claim_amount: None,
    }
}

pub fn tours() -> Vec<Tour> {
    let mut survey = tour(
        "TR-001",
        "P-101",
        "Solar Panel Installation",
        "Site Survey",
        "Headquarters",
        "Sector 4, North Zone",
    );
    survey.to_coordinates = Coordinate::new(37.7749, -122.4194);
    survey.advance_amount = Some(500.0);

    let mut testing = tour(
        "TR-002",
        "P-102",
        "Fiber Optic Maintenance",
        "Cable Testing",
        "Downtown Office",
        "Industrial Park Block C",
    );
    testing.to_coordinates = Coordinate::new(37.7849, -122.4294);
    testing.start_date = days_from_now(1);
    testing.end_date = days_from_now(1);

    vec![survey, testing]
}

fn session(
    id: &str,
    project: &str,
    topic: &str,
    venue: &str,
    coords: Coordinate,
    role: TrainingRole,
) -> TrainingSession {
    TrainingSession {
        id: id.to_string(),
        project_name: project.to_string(),
        topic: topic.to_string(),
        description: String::new(),
        start_date: today_at(9),
        end_date: today_at(11),
        location_name: venue.to_string(),
        location_coords: coords,
        role,
        status: TrainingStatus::Due,
        photo_url: None,
        actual_start_time: None,
        actual_end_time: None,
        completion_photo_url: None,
        remarks: None,
    }
}

pub fn training_sessions() -> Vec<TrainingSession> {
    let mut trainer = session(
        "G-201",
        "Smart Meter Installation",
        "Batch 5 - Junior Technicians",
        "West Wing Assembly Hall",
        Coordinate::new(37.7649, -122.4094),
        TrainingRole::Trainer,
    );
    trainer.start_date = today_at(14);
    trainer.end_date = today_at(17);

    vec![
        session(
            "T-101",
            "Solar Panel Safety",
            "Site Safety Protocols",
            "North Zone Office, Conf Room A",
            Coordinate::new(37.7749, -122.4194),
            TrainingRole::Trainee,
        ),
        session(
            "T-103",
            "HR Policy",
            "Annual Compliance Update",
            "Online / Remote",
            Coordinate::UNSET,
            TrainingRole::Trainee,
        ),
        trainer,
    ]
}

pub fn sites() -> Vec<Site> {
    vec![
        Site {
            id: "S-001".to_string(),
            name: "Sector 4, North Zone".to_string(),
            category: "Client Site".to_string(),
            coordinate: Coordinate::new(37.7749, -122.4194),
        },
        Site {
            id: "S-002".to_string(),
            name: "Industrial Park Block C".to_string(),
            category: "Client Site".to_string(),
            coordinate: Coordinate::new(37.7849, -122.4294),
        },
        Site {
            id: "S-003".to_string(),
            name: "Headquarters".to_string(),
            category: "Office".to_string(),
            coordinate: Coordinate::new(37.7949, -122.3994),
        },
    ]
}

pub fn notifications() -> Vec<Notification> {
    vec![Notification {
        id: "n1".to_string(),
        kind: NotificationType::ProjectAssigned,
        title: "New Project Assigned".to_string(),
        message: "You have been assigned to \"Solar Panel Installation - North Zone\". Check details now."
            .to_string(),
        timestamp: Utc::now(),
        read: false,
        reference_id: Some("P-101".to_string()),
        route: Some("/projects/P-101".to_string()),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_ids_unique() {
        let tours = tours();
        assert_eq!(tours.len(), 2);
        assert_ne!(tours[0].id, tours[1].id);

        let sessions = training_sessions();
        assert!(sessions.iter().any(|s| s.location_coords.is_unset()));
    }

    #[test]
    fn test_today_at_parses() {
        let ts = today_at(9);
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
