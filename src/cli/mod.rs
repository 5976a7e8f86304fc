//! Command line front end: the server plus offline admin commands.

use crate::camera::{Camera, CameraInfo};
use crate::common::{Config, DevMode};
use crate::core::annotate::annotate_faces;
use crate::core::pipeline::{self, RecognitionPipeline};
use crate::core::{FaceEngine, Gallery, OnnxFaceEngine, SharedGallery};
use crate::report::{self, ReportPeriod};
use crate::service::{self, AppState};
use crate::storage::{AttendanceStore, NewStudent};
use anyhow::{Context as _, Result};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug)]
#[command(name = "face-attendance")]
#[command(about = "Face recognition attendance tracker", version)]
pub struct Cli {
    /// Enable development mode (data, models and captures under ./dev_data)
    #[arg(long, global = true)]
    pub dev: bool,

    /// Config file (default: configs/attendance.toml, then the system config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the web dashboard, API and live camera recognition
    Serve {
        /// Override server.bind_addr
        #[arg(long)]
        bind: Option<String>,
        /// Serve without opening the camera
        #[arg(long)]
        no_camera: bool,
    },
    /// Register a student from a photo
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        course: String,
        /// Photo with the student's face
        #[arg(long)]
        photo: PathBuf,
    },
    /// Replace a student's face signature from a new photo
    Reenroll {
        id: String,
        #[arg(long)]
        photo: PathBuf,
    },
    /// List registered students
    Students,
    /// Delete a student and their attendance history
    Delete { id: String },
    /// Show attendance records
    Attendance {
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Write the attendance log as CSV
    Export {
        #[command(flatten)]
        period: PeriodArgs,
        /// Output file, `-` for stdout
        #[arg(short, long, default_value = report::LOG_FILENAME)]
        output: PathBuf,
    },
    /// Write the monthly per-student summary as CSV
    Summary {
        /// YYYY-MM, defaults to the current month
        #[arg(long)]
        month: Option<String>,
        /// Output file, `-` for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Recognize faces in an image file
    Recognize {
        image: PathBuf,
        /// Only identify, do not log attendance
        #[arg(long)]
        dry_run: bool,
        /// Save an annotated copy to the debug directory
        #[arg(long)]
        save: bool,
    },
    /// Capture a frame and run face detection on it
    TestCamera,
    /// List video devices and show which one auto-detect picks
    DetectCamera,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PeriodArgs {
    /// Single day, YYYY-MM-DD
    #[arg(long)]
    pub date: Option<String>,
    /// Whole month, YYYY-MM
    #[arg(long)]
    pub month: Option<String>,
    /// Start date, YYYY-MM-DD
    #[arg(long)]
    pub from: Option<String>,
    /// End date, YYYY-MM-DD
    #[arg(long)]
    pub to: Option<String>,
    /// Only this student
    #[arg(long)]
    pub student: Option<String>,
}

impl PeriodArgs {
    fn period(&self) -> crate::common::Result<ReportPeriod> {
        ReportPeriod::from_params(
            self.date.as_deref(),
            self.month.as_deref(),
            self.from.as_deref(),
            self.to.as_deref(),
        )
    }
}

/// Resolved config and paths shared by every command.
struct Context {
    config: Config,
    dev_mode: DevMode,
}

impl Context {
    fn new(cli: &Cli) -> Result<Self> {
        let dev_mode = DevMode::new(cli.dev)?;
        let config = match &cli.config {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load()?,
        };
        Ok(Self { config, dev_mode })
    }

    fn open_store(&self) -> Result<AttendanceStore> {
        let path = self.dev_mode.database_path(&self.config);
        AttendanceStore::open(&path).with_context(|| format!("opening {}", path.display()))
    }

    fn engine(&self) -> Result<OnnxFaceEngine> {
        let models_dir = self.dev_mode.models_dir(&self.config);
        OnnxFaceEngine::new(&self.config, &models_dir)
            .with_context(|| format!("loading face models from {}", models_dir.display()))
    }

    fn photos_dir(&self) -> PathBuf {
        self.dev_mode.photos_dir(&self.config)
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let ctx = Context::new(&cli)?;

    match cli.command {
        Commands::Serve { bind, no_camera } => serve(ctx, bind, no_camera),
        Commands::Register { id, name, course, photo } => {
            register(&ctx, NewStudent { id, name, course }, &photo)
        }
        Commands::Reenroll { id, photo } => reenroll(&ctx, &id, &photo),
        Commands::Students => list_students(&ctx),
        Commands::Delete { id } => {
            ctx.open_store()?.delete_student(&id)?;
            println!("Deleted student {} and their attendance history", id);
            Ok(())
        }
        Commands::Attendance { period, limit } => show_attendance(&ctx, &period, limit),
        Commands::Export { period, output } => export(&ctx, &period, &output),
        Commands::Summary { month, output } => summary(&ctx, month.as_deref(), output),
        Commands::Recognize { image, dry_run, save } => recognize(&ctx, &image, dry_run, save),
        Commands::TestCamera => test_camera(&ctx),
        Commands::DetectCamera => detect_camera(),
    }
}

fn serve(mut ctx: Context, bind: Option<String>, no_camera: bool) -> Result<()> {
    if let Some(bind) = bind {
        ctx.config.server.bind_addr = bind;
    }
    if no_camera {
        ctx.config.server.enable_camera = false;
    }

    let store = ctx.open_store()?;
    let engine: Arc<dyn FaceEngine> = Arc::new(ctx.engine()?);
    let photos_dir = Some(ctx.photos_dir());
    let state = AppState::new(ctx.config, store, engine, photos_dir)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(service::serve(state))
}

fn register(ctx: &Context, student: NewStudent, photo: &Path) -> Result<()> {
    let bytes = std::fs::read(photo).with_context(|| format!("reading {}", photo.display()))?;
    let store = Mutex::new(ctx.open_store()?);
    let engine = ctx.engine()?;
    let gallery = SharedGallery::default();
    let photos_dir = ctx.photos_dir();

    let registration = pipeline::register_student(
        &engine,
        &store,
        &gallery,
        &ctx.config,
        student,
        &bytes,
        Some(photos_dir.as_path()),
    )?;

    println!("✅ Registered {} ({})", registration.student.name, registration.student.id);
    println!("   {}", registration.quality.get_quality_assessment());
    if registration.faces_detected > 1 {
        println!("   {} faces in photo, used the best one", registration.faces_detected);
    }
    if let Some(path) = &registration.photo_path {
        println!("   Photo saved to {}", path.display());
    }
    Ok(())
}

fn reenroll(ctx: &Context, id: &str, photo: &Path) -> Result<()> {
    let bytes = std::fs::read(photo).with_context(|| format!("reading {}", photo.display()))?;
    let store = Mutex::new(ctx.open_store()?);
    let engine = ctx.engine()?;
    let gallery = SharedGallery::default();
    let photos_dir = ctx.photos_dir();

    let registration =
        pipeline::re_enroll(&engine, &store, &gallery, &ctx.config, id, &bytes, Some(photos_dir.as_path()))?;
    println!("✅ Updated face signature for {} ({})", registration.student.name, id);
    println!("   {}", registration.quality.get_quality_assessment());
    Ok(())
}

fn list_students(ctx: &Context) -> Result<()> {
    let students = ctx.open_store()?.list_students()?;
    if students.is_empty() {
        println!("No students registered");
        return Ok(());
    }

    println!("{:<16} {:<28} {:<20} Registered", "ID", "Name", "Course");
    for s in &students {
        println!(
            "{:<16} {:<28} {:<20} {}",
            s.id,
            s.name,
            s.course,
            s.created_at.format("%Y-%m-%d")
        );
    }
    println!("\n{} student(s)", students.len());
    Ok(())
}

fn show_attendance(ctx: &Context, period: &PeriodArgs, limit: Option<usize>) -> Result<()> {
    let mut filter = period.period()?.to_filter(period.student.clone())?;
    filter.limit = limit;
    let records = ctx.open_store()?.attendance_log(&filter)?;

    if records.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    println!("{:<11} {:<9} {:<16} {:<28} Status", "Date", "Time", "Student ID", "Name");
    for r in &records {
        println!(
            "{:<11} {:<9} {:<16} {:<28} {}",
            r.date,
            r.timestamp.format("%H:%M:%S"),
            r.student_id,
            r.name,
            r.status
        );
    }
    println!("\n{} record(s)", records.len());
    Ok(())
}

fn export(ctx: &Context, period: &PeriodArgs, output: &Path) -> Result<()> {
    let filter = period.period()?.to_filter(period.student.clone())?;
    let records = ctx.open_store()?.attendance_log(&filter)?;
    write_output(output, &report::attendance_log_csv(&records))?;
    if output != Path::new("-") {
        println!("Exported {} record(s) to {}", records.len(), output.display());
    }
    Ok(())
}

fn summary(ctx: &Context, month: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let (year, month) = match month {
        Some(month) => report::parse_month(month)?,
        None => {
            let today = pipeline::local_now(ctx.config.attendance.offset()?).date_naive();
            (today.year(), today.month())
        }
    };

    let rows = ctx.open_store()?.monthly_summary(year, month)?;
    let output = output.unwrap_or_else(|| PathBuf::from(report::summary_filename(year, month)));
    write_output(&output, &report::monthly_summary_csv(&rows))?;
    if output != Path::new("-") {
        println!("Wrote summary for {} student(s) to {}", rows.len(), output.display());
    }
    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if path == Path::new("-") {
        print!("{}", contents);
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

fn recognize(ctx: &Context, image_path: &Path, dry_run: bool, save: bool) -> Result<()> {
    let bytes = std::fs::read(image_path).with_context(|| format!("reading {}", image_path.display()))?;
    let frame = pipeline::decode_photo(&bytes)?;

    let store = ctx.open_store()?;
    let gallery = Gallery::from_entries(store.gallery_entries()?);

    let recognition = RecognitionPipeline::new(Arc::new(ctx.engine()?), &ctx.config)?;
    let faces = if dry_run {
        recognition.identify(&frame, &gallery)?
    } else {
        let store = Mutex::new(store);
        recognition.process_frame(&frame, &gallery, &store, recognition.now())?.faces
    };

    if faces.is_empty() {
        println!("❌ No faces found");
    }
    for (i, face) in faces.iter().enumerate() {
        match (&face.student_id, &face.name, face.score) {
            (Some(id), Some(name), Some(score)) => println!(
                "Face {}: {} ({}) score {:.3}{}",
                i + 1,
                name,
                id,
                score,
                if face.recorded { " - attendance recorded" } else { "" }
            ),
            _ => println!("Face {}: unknown (confidence {:.2})", i + 1, face.face.confidence),
        }
    }

    if save {
        let annotated = annotate_faces(&frame, faces.iter().map(|f| (&f.face, f.is_recognized())));
        let path = ctx.dev_mode.get_debug_path("recognize");
        annotated.save(&path).with_context(|| format!("saving {}", path.display()))?;
        println!("Annotated image saved to {}", path.display());
    }
    Ok(())
}

fn test_camera(ctx: &Context) -> Result<()> {
    println!("Testing camera...");
    let mut camera = Camera::new(&ctx.config.camera)?;
    let frame = camera.capture_frame()?;
    println!("✅ Captured {}x{} frame from /dev/video{}", frame.width(), frame.height(), camera.index());

    let capture_path = ctx.dev_mode.get_capture_path("camera_test");
    frame.save(&capture_path).with_context(|| format!("saving {}", capture_path.display()))?;
    println!("   Saved to {}", capture_path.display());

    match ctx.engine() {
        Ok(engine) => {
            let faces = engine.detect(&frame)?;
            println!("   Detected {} face(s)", faces.len());
            if !faces.is_empty() {
                let annotated = annotate_faces(&frame, faces.iter().map(|f| (f, false)));
                let debug_path = ctx.dev_mode.get_debug_path("camera_test");
                annotated.save(&debug_path)?;
                println!("   Detections drawn in {}", debug_path.display());
            }
        }
        Err(e) => println!("⚠️  Skipping face detection: {:#}", e),
    }
    Ok(())
}

fn detect_camera() -> Result<()> {
    println!("Detecting available cameras...\n");
    let cameras = Camera::list_all_cameras()?;

    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check that a camera is connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    for CameraInfo { index, name, formats, video_capture } in &cameras {
        println!("📷 /dev/video{}: {}", index, name);
        println!("   capture: {}, formats: {}", video_capture, formats.join(", "));
    }

    let selected = Camera::detect_camera()?;
    println!("\n✅ Auto-detect (device_index = 999) picks /dev/video{}", selected);
    println!("\nTo pin a camera, set it in the config:");
    println!("   [camera]");
    println!("   device_index = <NUMBER>");
    Ok(())
}
