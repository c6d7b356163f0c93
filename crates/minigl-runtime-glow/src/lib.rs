//! minigl runtime (glow/OpenGL backend)
//
// This crate only realizes the `Backend` capability on OpenGL 3.3 core:
// - textures are (texture, framebuffer) pairs so any texture can be a render target
// - pipelines are linked programs drawn with one fullscreen triangle
// - binding sets are texture-unit assignments plus uniform values (no GL object)
//
// It does NOT own the window or the GL context lifetime; the host creates the
// context, makes it current, and hands a `glow::Context` over.
#![allow(clippy::missing_safety_doc)]
#![deny(missing_debug_implementations)]

use std::fmt;

use glow::HasContext;
use tracing::{debug, warn};

use minigl_core::{EngineError, TextureFormat};
use minigl_graph::{
    Backend, ClearPolicy, PipelineDesc, RenderPass, Sampler, TextureBinding, TextureDesc,
    UniformBlock, UniformValue,
};

/// Vertex stage used when a program brings only a fragment shader.
pub const FULLSCREEN_VERT: &str = r#"#version 330 core
layout (location = 0) in vec2 a_pos;
layout (location = 1) in vec2 a_uv;
out vec2 v_uv;
void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
"#;

/// A color texture with its own framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlTexture {
    pub tex: glow::NativeTexture,
    pub fbo: glow::NativeFramebuffer,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct GlPipeline {
    program: glow::NativeProgram,
    label: String,
    color_targets: u32,
}

#[derive(Debug)]
pub struct GlBindings {
    textures: Vec<BoundTexture>,
    uniforms: UniformBlock,
}

#[derive(Debug)]
struct BoundTexture {
    unit: u32,
    name: String,
    tex: glow::NativeTexture,
    sampler: Sampler,
}

pub struct GlowBackend {
    gl: glow::Context,
    fs_tri: FullscreenTriangle,
    /// Scratch framebuffer for passes with more than one color target.
    mrt_fbo: Option<glow::NativeFramebuffer>,
    surface: (u32, u32),
    passes: u64,
}

impl fmt::Debug for GlowBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowBackend")
            .field("gl", &"<glow::Context>")
            .field("fs_tri", &self.fs_tri)
            .field("mrt_fbo", &self.mrt_fbo)
            .field("surface", &self.surface)
            .field("passes", &self.passes)
            .finish()
    }
}

impl GlowBackend {
    /// `gl` must be current on this thread for as long as the backend lives.
    pub unsafe fn new(gl: glow::Context, width: u32, height: u32) -> Result<Self, EngineError> {
        let fs_tri = FullscreenTriangle::new(&gl)?;
        Ok(Self {
            gl,
            fs_tri,
            mrt_fbo: None,
            surface: (width, height),
            passes: 0,
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Passes drawn since creation.
    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    /// Release backend-owned GL objects and hand the context back.
    pub unsafe fn destroy(mut self) -> glow::Context {
        self.fs_tri.destroy(&self.gl);
        if let Some(fbo) = self.mrt_fbo.take() {
            self.gl.delete_framebuffer(fbo);
        }
        self.gl
    }

    unsafe fn mrt_framebuffer(&mut self) -> Result<glow::NativeFramebuffer, EngineError> {
        if let Some(fbo) = self.mrt_fbo {
            return Ok(fbo);
        }
        let fbo = self
            .gl
            .create_framebuffer()
            .map_err(|e| EngineError::BackendCreate(format!("create_framebuffer (mrt): {e}")))?;
        self.mrt_fbo = Some(fbo);
        Ok(fbo)
    }

    /// Attach `targets` to the scratch framebuffer and enable one draw buffer each.
    unsafe fn bind_targets(&mut self, label: &str, targets: &[GlTexture]) -> Result<(), EngineError> {
        if let [single] = targets {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(single.fbo));
            return Ok(());
        }

        let fbo = self.mrt_framebuffer()?;
        let gl = &self.gl;
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
        let mut draw_buffers = Vec::with_capacity(targets.len());
        for slot in 0..minigl_core::MAX_COLOR_TARGETS {
            let attachment = glow::COLOR_ATTACHMENT0 + slot;
            let tex = targets.get(slot as usize).map(|t| t.tex);
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, attachment, glow::TEXTURE_2D, tex, 0);
            if tex.is_some() {
                draw_buffers.push(attachment);
            }
        }
        gl.draw_buffers(&draw_buffers);

        let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
        if status != glow::FRAMEBUFFER_COMPLETE {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            return Err(EngineError::Backend(format!(
                "{label}: multi-target framebuffer incomplete: 0x{status:x}"
            )));
        }
        Ok(())
    }

    unsafe fn apply_uniforms(&self, program: glow::NativeProgram, uniforms: &UniformBlock) {
        let gl = &self.gl;
        for (name, value) in uniforms.iter() {
            let Some(loc) = gl.get_uniform_location(program, name) else {
                continue;
            };
            match *value {
                UniformValue::Float(v) => gl.uniform_1_f32(Some(&loc), v),
                UniformValue::Int(v) => gl.uniform_1_i32(Some(&loc), v),
                UniformValue::Bool(v) => gl.uniform_1_i32(Some(&loc), v as i32),
                UniformValue::Vec2([x, y]) => gl.uniform_2_f32(Some(&loc), x, y),
                UniformValue::Vec3([x, y, z]) => gl.uniform_3_f32(Some(&loc), x, y, z),
                UniformValue::Vec4([x, y, z, w]) => gl.uniform_4_f32(Some(&loc), x, y, z, w),
            }
        }
    }

    unsafe fn bind_textures(&self, program: glow::NativeProgram, textures: &[BoundTexture]) {
        let gl = &self.gl;
        for bound in textures {
            gl.active_texture(glow::TEXTURE0 + bound.unit);
            gl.bind_texture(glow::TEXTURE_2D, Some(bound.tex));
            let filter = match bound.sampler {
                Sampler::Linear => glow::LINEAR,
                Sampler::Nearest => glow::NEAREST,
            } as i32;
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);

            for name in sampler_candidates(&bound.name, bound.unit) {
                if let Some(loc) = gl.get_uniform_location(program, &name) {
                    gl.uniform_1_i32(Some(&loc), bound.unit as i32);
                }
            }
        }
    }

    unsafe fn unbind_textures(&self, textures: &[BoundTexture]) {
        for bound in textures {
            self.gl.active_texture(glow::TEXTURE0 + bound.unit);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        self.gl.active_texture(glow::TEXTURE0);
    }
}

impl Backend for GlowBackend {
    type Texture = GlTexture;
    type Pipeline = GlPipeline;
    type BindingSet = GlBindings;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GlTexture, EngineError> {
        unsafe { create_render_texture(&self.gl, desc) }
    }

    fn destroy_texture(&mut self, texture: GlTexture) {
        unsafe {
            self.gl.delete_framebuffer(texture.fbo);
            self.gl.delete_texture(texture.tex);
        }
    }

    fn clear_texture(&mut self, texture: &GlTexture, rgba: [f32; 4]) -> Result<(), EngineError> {
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(texture.fbo));
            gl.viewport(0, 0, texture.width as i32, texture.height as i32);
            gl.clear_color(rgba[0], rgba[1], rgba[2], rgba[3]);
            gl.clear(glow::COLOR_BUFFER_BIT);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        Ok(())
    }

    fn upload_rgba(
        &mut self,
        texture: &GlTexture,
        width: u32,
        height: u32,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let expected = (width as usize) * (height as usize) * 4;
        if bytes.len() != expected {
            return Err(EngineError::Backend(format!(
                "upload of {width}x{height} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        if (texture.width, texture.height) != (width, height) {
            return Err(EngineError::Backend(format!(
                "upload {width}x{height} into {}x{} texture",
                texture.width, texture.height
            )));
        }
        unsafe {
            let gl = &self.gl;
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.bind_texture(glow::TEXTURE_2D, Some(texture.tex));
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(bytes),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn compile_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<GlPipeline, EngineError> {
        let vert = desc.program.vertex.as_deref().unwrap_or(FULLSCREEN_VERT);
        let program = unsafe { compile_program(&self.gl, desc.label, vert, &desc.program.fragment)? };
        debug!(
            pipeline = desc.label,
            samplers = ?desc.texture_inputs,
            targets = desc.color_targets,
            "linked GL program"
        );
        Ok(GlPipeline {
            program,
            label: desc.label.to_string(),
            color_targets: desc.color_targets,
        })
    }

    fn destroy_pipeline(&mut self, pipeline: GlPipeline) {
        unsafe { self.gl.delete_program(pipeline.program) }
    }

    fn create_binding_set(
        &mut self,
        _pipeline: &GlPipeline,
        textures: &[TextureBinding<'_, GlTexture>],
        uniforms: &UniformBlock,
    ) -> Result<GlBindings, EngineError> {
        let textures = textures
            .iter()
            .enumerate()
            .map(|(unit, b)| BoundTexture {
                unit: unit as u32,
                name: b.name.to_string(),
                tex: b.texture.tex,
                sampler: b.sampler,
            })
            .collect();
        Ok(GlBindings {
            textures,
            uniforms: uniforms.clone(),
        })
    }

    fn destroy_binding_set(&mut self, _bindings: GlBindings) {}

    fn render_pass(&mut self, pass: &RenderPass<'_, Self>) -> Result<(), EngineError> {
        if pass.targets.len() as u32 != pass.pipeline.color_targets {
            return Err(EngineError::Backend(format!(
                "{}: {} targets for a pipeline declaring {}",
                pass.label,
                pass.targets.len(),
                pass.pipeline.color_targets
            )));
        }
        unsafe {
            self.bind_targets(pass.label, pass.targets)?;

            let gl = &self.gl;
            gl.viewport(0, 0, pass.width as i32, pass.height as i32);
            gl.disable(glow::DEPTH_TEST);
            gl.disable(glow::BLEND);
            if let ClearPolicy::Clear(c) = pass.clear {
                gl.clear_color(c[0], c[1], c[2], c[3]);
                gl.clear(glow::COLOR_BUFFER_BIT);
            }

            let program = pass.pipeline.program;
            gl.use_program(Some(program));
            self.apply_uniforms(program, &pass.bindings.uniforms);
            self.bind_textures(program, &pass.bindings.textures);

            self.fs_tri.draw(&self.gl);

            self.unbind_textures(&pass.bindings.textures);
            self.gl.use_program(None);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.passes += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<(), EngineError> {
        unsafe { self.gl.flush() };
        Ok(())
    }

    // Blits the whole allocation; the logical size can lag it for overridden assets.
    fn present(&mut self, texture: &GlTexture, _width: u32, _height: u32) -> Result<(), EngineError> {
        let (sw, sh) = self.surface;
        if sw == 0 || sh == 0 {
            warn!("present skipped: surface has zero size");
            return Ok(());
        }
        unsafe {
            let gl = &self.gl;
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(texture.fbo));
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
            gl.viewport(0, 0, sw as i32, sh as i32);
            gl.blit_framebuffer(
                0,
                0,
                texture.width as i32,
                texture.height as i32,
                0,
                0,
                sw as i32,
                sh as i32,
                glow::COLOR_BUFFER_BIT,
                glow::LINEAR,
            );
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.bind_framebuffer(glow::DRAW_FRAMEBUFFER, None);
        }
        Ok(())
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = (width, height);
    }
}

/// Uniform names a sampler is published under: its port name, then the
/// Shadertoy-style channel names for its unit.
fn sampler_candidates(port: &str, unit: u32) -> Vec<String> {
    vec![
        port.to_string(),
        format!("iChannel{unit}"),
        format!("uTex{unit}"),
    ]
}

/// (internal format, pixel type) for a texture format.
fn gl_format(format: TextureFormat) -> (i32, u32) {
    match format {
        TextureFormat::Rgba8 => (glow::RGBA8 as i32, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16f => (glow::RGBA16F as i32, glow::HALF_FLOAT),
    }
}

unsafe fn create_render_texture(
    gl: &glow::Context,
    desc: &TextureDesc<'_>,
) -> Result<GlTexture, EngineError> {
    if desc.width == 0 || desc.height == 0 {
        return Err(EngineError::BackendCreate(format!(
            "{}: zero-sized texture",
            desc.label
        )));
    }
    let fbo = gl
        .create_framebuffer()
        .map_err(|e| EngineError::BackendCreate(format!("create_framebuffer failed: {e:?}")))?;
    let tex = match gl.create_texture() {
        Ok(t) => t,
        Err(e) => {
            gl.delete_framebuffer(fbo);
            return Err(EngineError::BackendCreate(format!("create_texture failed: {e:?}")));
        }
    };

    let (internal, ty) = gl_format(desc.format);
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        internal,
        desc.width as i32,
        desc.height as i32,
        0,
        glow::RGBA,
        ty,
        None,
    );

    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_2D,
        Some(tex),
        0,
    );

    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    gl.bind_texture(glow::TEXTURE_2D, None);
    if status != glow::FRAMEBUFFER_COMPLETE {
        gl.delete_framebuffer(fbo);
        gl.delete_texture(tex);
        return Err(EngineError::BackendCreate(format!(
            "{}: framebuffer incomplete: 0x{status:x}",
            desc.label
        )));
    }

    Ok(GlTexture {
        tex,
        fbo,
        width: desc.width,
        height: desc.height,
    })
}

pub unsafe fn compile_program(
    gl: &glow::Context,
    label: &str,
    vert_src: &str,
    frag_src: &str,
) -> Result<glow::NativeProgram, EngineError> {
    let vs = gl
        .create_shader(glow::VERTEX_SHADER)
        .map_err(|e| EngineError::BackendCreate(format!("create_shader(VS) failed: {e:?}")))?;
    gl.shader_source(vs, vert_src);
    gl.compile_shader(vs);
    if !gl.get_shader_compile_status(vs) {
        let log = gl.get_shader_info_log(vs);
        gl.delete_shader(vs);
        return Err(EngineError::ShaderCompile(format!("{label} (vertex): {log}")));
    }

    let fs = match gl.create_shader(glow::FRAGMENT_SHADER) {
        Ok(fs) => fs,
        Err(e) => {
            gl.delete_shader(vs);
            return Err(EngineError::BackendCreate(format!("create_shader(FS) failed: {e:?}")));
        }
    };
    gl.shader_source(fs, frag_src);
    gl.compile_shader(fs);
    if !gl.get_shader_compile_status(fs) {
        let log = gl.get_shader_info_log(fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        return Err(EngineError::ShaderCompile(format!("{label} (fragment): {log}")));
    }

    let program = match gl.create_program() {
        Ok(p) => p,
        Err(e) => {
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            return Err(EngineError::BackendCreate(format!("create_program failed: {e:?}")));
        }
    };
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    gl.detach_shader(program, vs);
    gl.detach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(EngineError::ShaderCompile(format!("{label} (link): {log}")));
    }

    Ok(program)
}

#[derive(Debug)]
struct FullscreenTriangle {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl FullscreenTriangle {
    unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        // pos.xy, uv.xy
        let verts: [f32; 12] = [
            -1.0, -1.0, 0.0, 0.0, 3.0, -1.0, 2.0, 0.0, -1.0, 3.0, 0.0, 2.0,
        ];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::BackendCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::BackendCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&verts),
            glow::STATIC_DRAW,
        );

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);

        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    unsafe fn draw(&self, gl: &glow::Context) {
        gl.bind_vertex_array(Some(self.vao));
        gl.draw_arrays(glow::TRIANGLES, 0, 3);
        gl.bind_vertex_array(None);
    }

    unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_name_is_tried_before_channel_aliases() {
        let names = sampler_candidates("u_src", 2);
        assert_eq!(names, ["u_src", "iChannel2", "uTex2"]);
    }

    #[test]
    fn formats_map_to_sized_internal_formats() {
        assert_eq!(
            gl_format(TextureFormat::Rgba8),
            (glow::RGBA8 as i32, glow::UNSIGNED_BYTE)
        );
        assert_eq!(
            gl_format(TextureFormat::Rgba16f),
            (glow::RGBA16F as i32, glow::HALF_FLOAT)
        );
    }

    #[test]
    fn vertex_stage_exports_uv() {
        assert!(FULLSCREEN_VERT.contains("out vec2 v_uv"));
    }
}
