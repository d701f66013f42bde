//! Courses and lessons

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supabase::{eq, SupabaseClient, SupabaseError};

const COURSES: &str = "courses";
const LESSONS: &str = "course_lessons";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub position: i32,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub published: bool,
}

/// Course with its lessons in order
#[derive(Debug, Clone, Serialize)]
pub struct CourseWithLessons {
    #[serde(flatten)]
    pub course: Course,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCourse {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub published: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewLesson {
    pub id: Uuid,
    pub course_id: Uuid,
    pub position: i32,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub published: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LessonUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

#[derive(Clone)]
pub struct CourseStore {
    client: SupabaseClient,
}

impl CourseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn list_published(&self) -> Result<Vec<Course>, SupabaseError> {
        self.client
            .get(
                COURSES,
                &[
                    ("published", eq(true)),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<Course>, SupabaseError> {
        self.client
            .get(COURSES, &[("order", "created_at.desc".to_string())])
            .await
    }

    /// Published course by slug with its published lessons
    pub async fn published_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<CourseWithLessons>, SupabaseError> {
        let course: Option<Course> = self
            .client
            .get_one(COURSES, &[("slug", eq(slug)), ("published", eq(true))])
            .await?;

        let Some(course) = course else {
            return Ok(None);
        };

        let lessons = self
            .client
            .get(
                LESSONS,
                &[
                    ("course_id", eq(course.id)),
                    ("published", eq(true)),
                    ("order", "position.asc".to_string()),
                ],
            )
            .await?;

        Ok(Some(CourseWithLessons { course, lessons }))
    }

    pub async fn create(&self, course: &NewCourse) -> Result<Course, SupabaseError> {
        self.client.insert(COURSES, course).await
    }

    pub async fn update(
        &self,
        id: Uuid,
        update: &CourseUpdate,
    ) -> Result<Option<Course>, SupabaseError> {
        let rows: Vec<Course> = self
            .client
            .update_returning(COURSES, &[("id", eq(id))], update)
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn create_lesson(&self, lesson: &NewLesson) -> Result<Lesson, SupabaseError> {
        self.client.insert(LESSONS, lesson).await
    }

    pub async fn update_lesson(
        &self,
        id: Uuid,
        update: &LessonUpdate,
    ) -> Result<Option<Lesson>, SupabaseError> {
        let rows: Vec<Lesson> = self
            .client
            .update_returning(LESSONS, &[("id", eq(id))], update)
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn delete_lesson(&self, id: Uuid) -> Result<bool, SupabaseError> {
        Ok(self.client.delete(LESSONS, &[("id", eq(id))]).await? > 0)
    }

    /// Position after the current last lesson
    pub async fn next_lesson_position(&self, course_id: Uuid) -> Result<i32, SupabaseError> {
        #[derive(Deserialize)]
        struct Position {
            position: i32,
        }

        let last: Vec<Position> = self
            .client
            .get(
                LESSONS,
                &[
                    ("select", "position".to_string()),
                    ("course_id", eq(course_id)),
                    ("order", "position.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(last.first().map_or(1, |p| p.position + 1))
    }
}
