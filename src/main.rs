use std::path::PathBuf;

use clap::Parser;
use course_ledger::{
    EnrollmentLedger, Money, access,
    config::Config,
    progress::compute_progress,
    store::{
        self,
        course::{NewCourse, create_course, get_course, list_courses},
        lesson::{create_lesson, list_lessons, record_lesson_completion},
        user::{Role, create_user, get_user, list_users},
    },
    utils::init_log,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Path to TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Path to database file, overrides the config
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    Course {
        #[command(subcommand)]
        command: CourseCommand,
    },
    Lesson {
        #[command(subcommand)]
        command: LessonCommand,
    },
    /// Record a paid enrollment after payment was authorized
    Enroll {
        student: i64,
        course: i64,
        #[arg(short, long)]
        amount: Money,
        #[arg(short, long, default_value = "card")]
        method: String,
    },
    EnrollFree {
        student: i64,
        course: i64,
    },
    Unenroll {
        student: i64,
        course: i64,
        /// Proceed even when the course is paid or completed
        #[arg(short, long)]
        yes: bool,
    },
    Enrollments {
        student: i64,
    },
    Progress {
        student: i64,
        course: i64,
    },
    Access {
        user: i64,
        course: i64,
    },
    Activity {
        user: i64,
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Compare cached enrollment counters with enrollment rows
    Audit {
        #[arg(long)]
        repair: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum UserCommand {
    List,
    Show {
        id: i64,
    },
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long, default_value = "student")]
        role: Role,
    },
}

#[derive(Debug, clap::Subcommand)]
enum CourseCommand {
    List,
    Show {
        id: i64,
    },
    Create {
        #[arg(short, long)]
        instructor: i64,
        #[arg(short, long)]
        title: String,
        #[arg(short, long, default_value = "0")]
        price: Money,
        #[arg(long)]
        free: bool,
    },
}

#[derive(Debug, clap::Subcommand)]
enum LessonCommand {
    List {
        course: i64,
    },
    Add {
        course: i64,
        #[arg(short, long)]
        title: String,
        #[arg(short, long, default_value = "0")]
        position: i64,
        /// Create unpublished
        #[arg(long)]
        draft: bool,
    },
    Complete {
        student: i64,
        lesson: i64,
        #[arg(long)]
        undo: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        config.database = database;
    }
    let _guard = init_log(config.log_dir.clone())?;
    let database = store::open(&config).await?;
    let ledger = EnrollmentLedger::from_config(database.clone(), &config);

    match args.command {
        Commands::User { command } => match command {
            UserCommand::List => {
                for user in list_users(&database).await? {
                    println!("{:<8} {:<12} {:<24} {}", user.id, user.role, user.name, user.email);
                }
            }
            UserCommand::Show { id } => match get_user(&database, id).await? {
                Some(user) => println!("{:#?}", user),
                None => println!("User {} not found", id),
            },
            UserCommand::Create { name, email, role } => {
                let id = create_user(&database, &name, &email, role).await?;
                println!("User created with id: {}", id);
            }
        },
        Commands::Course { command } => match command {
            CourseCommand::List => {
                for course in list_courses(&database).await? {
                    println!(
                        "{:<8} {:>10} {:>6} {}",
                        course.id, course.price, course.enrollment_count, course.title
                    );
                }
            }
            CourseCommand::Show { id } => match get_course(&database, id).await? {
                Some(course) => println!("{:#?}", course),
                None => println!("Course {} not found", id),
            },
            CourseCommand::Create {
                instructor,
                title,
                price,
                free,
            } => {
                let course = NewCourse {
                    instructor_id: instructor,
                    title,
                    price: if free { Money::ZERO } else { price },
                    is_free: free,
                };
                let id = create_course(&database, &course).await?;
                println!("Course created with id: {}", id);
            }
        },
        Commands::Lesson { command } => match command {
            LessonCommand::List { course } => {
                for lesson in list_lessons(&database, course).await? {
                    let state = if lesson.is_published { "" } else { " (draft)" };
                    println!("{:<8} {:<4} {}{}", lesson.id, lesson.position, lesson.title, state);
                }
            }
            LessonCommand::Add {
                course,
                title,
                position,
                draft,
            } => {
                let id = create_lesson(&database, course, &title, position, !draft).await?;
                println!("Lesson created with id: {}", id);
            }
            LessonCommand::Complete {
                student,
                lesson,
                undo,
            } => {
                record_lesson_completion(&database, student, lesson, !undo).await?;
                println!("Lesson {} marked {}", lesson, if undo { "incomplete" } else { "complete" });
            }
        },
        Commands::Enroll {
            student,
            course,
            amount,
            method,
        } => {
            let enrollment = ledger.enroll(student, course, amount, &method).await?;
            println!(
                "Enrollment {} created: student {} paid {} for course {}",
                enrollment.id, student, enrollment.payment_amount, course
            );
        }
        Commands::EnrollFree { student, course } => {
            let enrollment = ledger.enroll_free(student, course).await?;
            println!("Enrollment {} created for free course {}", enrollment.id, course);
        }
        Commands::Unenroll {
            student,
            course,
            yes,
        } => {
            let eligibility = ledger.can_unenroll(student, course).await?;
            if !eligibility.is_allowed() {
                anyhow::bail!("Student {} is not enrolled in course {}", student, course);
            }
            if let Some(warning) = eligibility.warning() {
                println!("Warning: {}", warning);
                if !yes {
                    println!("Re-run with --yes to unenroll anyway");
                    return Ok(());
                }
            }
            let summary = ledger.unenroll(student, course).await?;
            println!(
                "Unenrolled student {} from course {} ({} lesson progress rows removed)",
                student, course, summary.lesson_progress_removed
            );
            if summary.counter_drift_detected {
                println!("Enrollment counter had drifted, run `audit --repair`");
            }
        }
        Commands::Enrollments { student } => {
            for course in ledger.list_enrollments(student).await? {
                let e = &course.enrollment;
                println!(
                    "{:<8} {:>10} {:>7.2}% {}",
                    e.course_id, e.payment_amount, e.progress_percentage, course.course_title
                );
            }
        }
        Commands::Progress { student, course } => {
            let report = compute_progress(&database, student, course).await?;
            println!(
                "{}/{} lessons completed ({:.2}%)",
                report.completed_lessons, report.published_lessons, report.percentage
            );
        }
        Commands::Access { user, course } => {
            let allowed = access::has_access(&database, user, course).await?;
            println!("{}", if allowed { "allowed" } else { "denied" });
        }
        Commands::Activity { user, limit } => {
            for entry in ledger.activity().list_for_user(user, limit).await? {
                println!("{} {:<20} {}", entry.created_at, entry.action, entry.description);
            }
        }
        Commands::Audit { repair } => {
            let drifted = if repair {
                ledger.reconcile_counters().await?
            } else {
                ledger.counter_drift().await?
            };
            if drifted.is_empty() {
                println!("All enrollment counters match");
            }
            for drift in drifted {
                println!(
                    "course {:<8} cached {:<6} actual {:<6}{}",
                    drift.course_id,
                    drift.cached,
                    drift.actual,
                    if repair { " (repaired)" } else { "" }
                );
            }
        }
    }
    Ok(())
}
